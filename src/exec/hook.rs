// Statement hooks

use super::context::ExecContext;

/// Interceptor around an intercepted statement.
///
/// `before` hooks run in registration order before image capture; `after`
/// hooks run in the same order once the statement finished, including when
/// it failed, and can read the captured images from the context.
pub trait SqlHook: Send + Sync {
    fn before(&self, ctx: &ExecContext<'_>);

    fn after(&self, ctx: &ExecContext<'_>);
}
