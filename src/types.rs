use std::sync::{Arc, RwLock};

use crate::error::WrenError;

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub type WrenResult = Result<(), WrenError>;

pub type ResultPod<T> = Result<Pod<T>, WrenError>;
