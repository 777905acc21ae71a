/// Runners that execute script languages inside an embedded engine,
/// plus the bookkeeping of live execution contexts.
pub mod native;
pub mod registry;
