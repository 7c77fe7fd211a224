pub(crate) mod call_wrapper;
pub(crate) mod screen;
pub(crate) mod visual;
