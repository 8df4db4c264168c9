pub use smallvec::{smallvec, SmallVec};

pub type DefaultHashBuilder = foldhash::fast::RandomState;

pub mod hashmap {
    pub type HashMap<K, V> = hashbrown::HashMap<K, V, super::DefaultHashBuilder>;
}

pub mod hashset {
    pub type HashSet<T> = hashbrown::HashSet<T, super::DefaultHashBuilder>;
}
