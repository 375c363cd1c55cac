pub mod cache;
pub mod consts;
pub mod context;
pub mod dependency;
pub mod directive;
pub mod driver;
pub mod ellipsis;
pub mod flags;
pub mod graph;
pub mod hasher;
pub mod lint;
pub mod ops;
pub mod package;
pub mod pathutil;
pub mod project;
pub mod scheduler;
pub mod testrun;
pub mod vcs;

/// The result of iteration of this map is not ordered.
///
/// Please do not rely on any specific order.
pub type FastMap<K, V> = ::dashmap::DashMap<K, V, ::ahash::RandomState>;

/// The result of iteration of this set is not ordered.
///
/// Please do not rely on any specific order.
pub type FastSet<K> = ::dashmap::DashSet<K, ::ahash::RandomState>;
