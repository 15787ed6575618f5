//! Stable handles for everything the engine addresses by id.

use crate::define_id;

define_id!(
    /// One audio (machine) in the graph arena.
    AudioId, "audio"
);
define_id!(
    /// One output or input channel in the graph arena.
    ChannelId, "channel"
);
define_id!(
    /// One recycling (sample-buffer owner).
    RecyclingId, "recycling"
);
define_id!(
    /// One node of the recycling-context tree.
    ContextId, "context"
);
define_id!(
    /// Binding of a recall template to a recycling context.
    RecallId, "recall-id"
);
define_id!(
    /// One recall node, template or instance.
    RecallKey, "recall"
);
define_id!(
    /// One audio signal inside a recycling.
    SignalId, "signal"
);
define_id!(
    /// A group of templates sharing their ports.
    ContainerId, "container"
);
