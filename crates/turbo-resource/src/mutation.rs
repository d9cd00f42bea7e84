//! Async actions with observable status flags.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

type Action<A, R, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<R, E>> + Send + Sync>;
type SuccessHook<R> = Arc<dyn Fn(&R) + Send + Sync>;

/// Status of a [`Mutation`].
#[derive(Debug, Clone, PartialEq)]
pub struct MutationState<R, E> {
    /// Whether an action is in flight.
    pub is_loading: bool,
    /// Whether the most recent action succeeded.
    pub is_success: bool,
    /// Failure from the most recent failed action, kept until [`Mutation::reset`].
    pub error: Option<E>,
    /// Result of the most recent successful action.
    pub returned_data: Option<R>,
}

impl<R, E> MutationState<R, E> {
    /// Whether an error is recorded.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl<R, E> Default for MutationState<R, E> {
    fn default() -> Self {
        Self {
            is_loading: false,
            is_success: false,
            error: None,
            returned_data: None,
        }
    }
}

/// Wraps an async action and tracks its status.
///
/// Independent of any cache. Clones share the same action and state.
///
/// # Example
///
/// ```rust,ignore
/// let add_to_cart = Mutation::new(|item: CartItem| async move { api.add(item).await })
///     .with_on_success(|cart: &Cart| info!(items = cart.len(), "cart updated"));
///
/// add_to_cart.mutate_async(item).await?;
/// assert!(add_to_cart.is_success());
/// ```
pub struct Mutation<A, R, E> {
    action: Action<A, R, E>,
    on_success: Option<SuccessHook<R>>,
    state: Arc<Mutex<MutationState<R, E>>>,
}

impl<A, R, E> Clone for Mutation<A, R, E> {
    fn clone(&self) -> Self {
        Self {
            action: Arc::clone(&self.action),
            on_success: self.on_success.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<A, R, E> Mutation<A, R, E>
where
    A: Send + 'static,
    R: Clone + Send + 'static,
    E: Clone + fmt::Display + Send + 'static,
{
    /// Wrap `action`.
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        Self {
            action: Arc::new(move |args: A| action(args).boxed()),
            on_success: None,
            state: Arc::new(Mutex::new(MutationState::default())),
        }
    }

    /// Call `hook` with the result of every successful action.
    pub fn with_on_success<H>(mut self, hook: H) -> Self
    where
        H: Fn(&R) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Run the action and record its outcome.
    ///
    /// The outcome is applied to the state in one step; the success hook
    /// runs after that, so it observes the settled state.
    pub async fn mutate_async(&self, args: A) -> Result<R, E> {
        self.lock_state().is_loading = true;

        match (self.action)(args).await {
            Ok(data) => {
                {
                    let mut state = self.lock_state();
                    state.is_loading = false;
                    state.returned_data = Some(data.clone());
                    state.is_success = true;
                }
                debug!("mutation succeeded");
                if let Some(hook) = &self.on_success {
                    hook(&data);
                }
                Ok(data)
            }
            Err(err) => {
                {
                    let mut state = self.lock_state();
                    state.is_success = false;
                    state.is_loading = false;
                    state.error = Some(err.clone());
                }
                warn!(error = %err, "mutation failed");
                Err(err)
            }
        }
    }
}

impl<A, R, E> Mutation<A, R, E> {
    fn lock_state(&self) -> MutexGuard<'_, MutationState<R, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return to the initial state.
    pub fn reset(&self) {
        *self.lock_state() = MutationState::default();
    }

    /// Whether an action is in flight.
    pub fn is_loading(&self) -> bool {
        self.lock_state().is_loading
    }

    /// Whether the most recent action succeeded.
    pub fn is_success(&self) -> bool {
        self.lock_state().is_success
    }

    /// Whether an error is recorded.
    pub fn is_error(&self) -> bool {
        self.lock_state().is_error()
    }
}

impl<A, R: Clone, E: Clone> Mutation<A, R, E> {
    /// Recorded error, if any.
    pub fn error(&self) -> Option<E> {
        self.lock_state().error.clone()
    }

    /// Result of the most recent successful action.
    pub fn returned_data(&self) -> Option<R> {
        self.lock_state().returned_data.clone()
    }

    /// Snapshot of every status field at once.
    pub fn state(&self) -> MutationState<R, E> {
        self.lock_state().clone()
    }
}

impl<A, R: fmt::Debug, E: fmt::Debug> fmt::Debug for Mutation<A, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("state", &*self.lock_state())
            .field("on_success", &self.on_success.is_some())
            .finish()
    }
}
