pub(crate) mod history;
pub(crate) mod logging;
pub(crate) mod report;

pub(crate) use logging::init_tracing;
pub(crate) use report::ReportingSink;
