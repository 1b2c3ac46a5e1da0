use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use log::debug;
use tempo_core::Timestamp;
use tempo_ports::{ContextError, ContextResult};
use tokio_util::sync::CancellationToken;

/// Cancellable execution context
///
/// A context is a node in a tree rooted at [`Context::background`]. Each
/// node may carry a deadline, a value, and a done signal. Once done, a
/// context reports why through [`err`](Context::err), and that answer
/// never changes.
///
/// Cloning is cheap and yields a handle to the same node.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    parent: Option<Context>,
    kind: Kind,
    deadline: Option<Timestamp>,
    token: CancellationToken,
    err: OnceLock<ContextError>,
}

enum Kind {
    /// Root, never done
    Background,
    /// Done when cancelled or when the parent is done
    Cancel,
    /// Shares the parent's signal, adds a value
    Value(Arc<dyn Any + Send + Sync>),
    /// Own signal, resolved by a deadline waiter
    Deadline,
}

/// Resolves the context it was returned with as `Canceled`
#[derive(Clone)]
pub struct CancelFunc {
    ctx: Context,
    /// Deadline node layered over `ctx`, resolved in the same call
    deadline: Option<Context>,
}

impl CancelFunc {
    /// Cancel the context; a no-op if it is already done
    pub fn cancel(&self) {
        self.ctx.resolve(ContextError::Canceled);
        if let Some(deadline) = &self.deadline {
            deadline.resolve(self.ctx.err().unwrap_or(ContextError::Canceled));
        }
    }

    /// Also resolve `deadline` when cancelling
    pub(crate) fn covering(self, deadline: &Context) -> Self {
        Self {
            deadline: Some(deadline.clone()),
            ..self
        }
    }
}

impl Context {
    /// Empty root context: no deadline, no values, never done
    pub fn background() -> Self {
        Self::node(None, Kind::Background, None, CancellationToken::new())
    }

    /// Derive a context that is done when `cancel` is called or when
    /// `parent` is done
    pub fn with_cancel(parent: &Context) -> (Context, CancelFunc) {
        let token = parent.inner.token.child_token();
        let ctx = Self::node(Some(parent.clone()), Kind::Cancel, None, token);
        let cancel = CancelFunc {
            ctx: ctx.clone(),
            deadline: None,
        };
        (ctx, cancel)
    }

    /// Derive a context carrying `value`
    ///
    /// Lookups with [`value`](Context::value) return the value closest to
    /// the context in its ancestry.
    pub fn with_value<T: Any + Send + Sync>(parent: &Context, value: T) -> Context {
        Self::node(
            Some(parent.clone()),
            Kind::Value(Arc::new(value)),
            None,
            parent.inner.token.clone(),
        )
    }

    /// Deadline node under `parent`, resolved only through `resolve`
    pub(crate) fn with_deadline(parent: &Context, deadline: Timestamp) -> Context {
        Self::node(
            Some(parent.clone()),
            Kind::Deadline,
            Some(deadline),
            CancellationToken::new(),
        )
    }

    fn node(
        parent: Option<Context>,
        kind: Kind,
        deadline: Option<Timestamp>,
        token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                parent,
                kind,
                deadline,
                token,
                err: OnceLock::new(),
            }),
        }
    }

    /// The earliest deadline this context is bound by, if any
    pub fn deadline(&self) -> Option<Timestamp> {
        self.inner
            .deadline
            .or_else(|| self.inner.parent.as_ref().and_then(Context::deadline))
    }

    /// Wait until the context is done
    pub async fn done(&self) {
        self.inner.token.cancelled().await
    }

    pub fn is_done(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Why the context is done; `None` while it is still live
    pub fn err(&self) -> Option<ContextError> {
        if !self.is_done() {
            return None;
        }
        match &self.inner.kind {
            Kind::Background => None,
            Kind::Value(_) => self.parent_err(),
            // Done through the parent's token: adopt the parent's cause.
            Kind::Cancel | Kind::Deadline => Some(*self.inner.err.get_or_init(|| {
                self.parent_err().unwrap_or(ContextError::Canceled)
            })),
        }
    }

    /// `Ok(())` while live, the resolution error once done
    pub fn check(&self) -> ContextResult<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Typed value lookup through the ancestry
    pub fn value<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Kind::Value(value) = &ctx.inner.kind {
                if let Ok(found) = Arc::clone(value).downcast::<T>() {
                    return Some(found);
                }
            }
            current = ctx.inner.parent.as_ref();
        }
        None
    }

    /// Resolve with `err` unless already done
    pub(crate) fn resolve(&self, err: ContextError) {
        match self.inner.kind {
            Kind::Cancel | Kind::Deadline => {}
            Kind::Background | Kind::Value(_) => return,
        }
        if self.is_done() {
            return;
        }
        if self.inner.err.set(err).is_ok() {
            debug!("Context resolved: {}", err);
            self.inner.token.cancel();
        }
    }

    fn parent_err(&self) -> Option<ContextError> {
        self.inner.parent.as_ref().and_then(Context::err)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline())
            .field("err", &self.err())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_background_is_never_done() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.deadline(), None);
        assert_eq!(ctx.check(), Ok(()));
    }

    #[test]
    fn test_cancel_resolves_once() {
        let (ctx, cancel) = Context::with_cancel(&Context::background());
        assert_eq!(ctx.err(), None);

        cancel.cancel();
        cancel.cancel();

        assert!(ctx.is_done());
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
        assert_eq!(ctx.check(), Err(ContextError::Canceled));
    }

    #[test]
    fn test_parent_cancellation_propagates_cause() {
        let deadline = Utc.with_ymd_and_hms(2018, 1, 1, 10, 0, 0).unwrap();
        let (root, _) = Context::with_cancel(&Context::background());
        let parent = Context::with_deadline(&root, deadline);
        let (child, child_cancel) = Context::with_cancel(&parent);

        parent.resolve(ContextError::DeadlineExceeded);

        assert!(child.is_done());
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
        assert_eq!(child.deadline(), Some(deadline));

        // The first answer sticks.
        child_cancel.cancel();
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
    }

    #[test]
    fn test_child_cancel_leaves_parent_live() {
        let (parent, _) = Context::with_cancel(&Context::background());
        let (child, cancel) = Context::with_cancel(&parent);

        cancel.cancel();

        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[test]
    fn test_value_lookup_walks_ancestry() {
        #[derive(Debug, PartialEq)]
        struct RequestId(u32);

        let outer = Context::with_value(&Context::background(), RequestId(1));
        let (cancellable, cancel) = Context::with_cancel(&outer);
        let inner = Context::with_value(&cancellable, "label");

        assert_eq!(inner.value::<RequestId>().as_deref(), Some(&RequestId(1)));
        assert_eq!(inner.value::<&str>().as_deref(), Some(&"label"));
        assert!(outer.value::<&str>().is_none());

        cancel.cancel();
        assert_eq!(inner.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn test_value_shadowing() {
        let outer = Context::with_value(&Context::background(), 1u64);
        let inner = Context::with_value(&outer, 2u64);

        assert_eq!(inner.value::<u64>().as_deref(), Some(&2));
        assert_eq!(outer.value::<u64>().as_deref(), Some(&1));
    }

    #[tokio::test]
    async fn test_done_wakes_waiter() {
        let (ctx, cancel) = Context::with_cancel(&Context::background());
        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                ctx.done().await;
                ctx.err()
            }
        });

        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Some(ContextError::Canceled));
    }
}
