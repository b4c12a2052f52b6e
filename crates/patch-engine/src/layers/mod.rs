pub(crate) mod execution;
pub(crate) mod policy;
pub(crate) mod service;
pub(crate) mod strategy;
