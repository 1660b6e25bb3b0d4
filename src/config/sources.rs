pub(crate) mod environment;
pub(crate) mod global_file;
pub(crate) mod project_file;
