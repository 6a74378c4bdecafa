//! Response data transfer objects.

pub mod response;
