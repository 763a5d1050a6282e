pub(crate) mod common;
mod reporting;
