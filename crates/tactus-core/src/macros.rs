//! Helper macros for the engine:
//! - `define_id!` - Declare an opaque, process-unique `u64` handle
//! - `params!` - Create parameter maps for recall instantiation

/// Declare a copyable id newtype backed by a process-wide counter.
///
/// # Example
/// ```ignore
/// define_id!(
///     /// Handle of one audio.
///     AudioId, "audio"
/// );
/// let id = AudioId::next();
/// ```
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        pub struct $name(u64);

        impl $name {
            /// Allocate a fresh id.
            pub fn next() -> Self {
                static COUNTER: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(1);
                Self(COUNTER.fetch_add(1, core::sync::atomic::Ordering::Relaxed))
            }

            #[inline]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

/// Create a `RecallParams` map with key-value pairs.
///
/// # Example
/// ```ignore
/// let params = params! {
///     "volume" => 0.5,
///     "muted" => false,
/// };
/// ```
#[macro_export]
macro_rules! params {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = $crate::RecallParams::new();
        $(
            map.insert($key.to_string(), $value.into());
        )*
        map
    }};
}
