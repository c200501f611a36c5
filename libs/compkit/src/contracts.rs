use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::ComponentConfig;
use crate::context::ComponentContext;

/// A unit of functionality constructed once per run by its factory.
///
/// The instance is shared: every component that resolves it receives a
/// clone of the same `Arc`, so methods handed out to other components must be
/// safe to call concurrently. The manager never mutates an instance after it
/// is Ready.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Called once, in realized order, after every component is Ready.
    /// Start background work (subscriptions, listeners) here.
    async fn on_all_components_loaded(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called on every Ready component, in reverse realized order, before
    /// the first `stop()`.
    async fn on_all_components_are_stopping(&self) {}

    /// Release resources. Runs in reverse realized order: every component
    /// that resolved this one has already been stopped.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Shared reference to a constructed component, usable both through the
/// [`Component`] trait and as its concrete type.
#[derive(Clone)]
pub struct ComponentHandle {
    component: Arc<dyn Component>,
    any: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ComponentHandle {
    pub fn new<T: Component>(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub fn from_arc<T: Component>(instance: Arc<T>) -> Self {
        Self {
            component: instance.clone(),
            any: instance,
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn component(&self) -> &Arc<dyn Component> {
        &self.component
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The concrete instance, if it is a `T`.
    pub fn downcast<T: Component>(&self) -> Option<Arc<T>> {
        self.any.clone().downcast::<T>().ok()
    }

    /// Number of live references to the instance (the record's own included).
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.component)
    }
}

impl std::fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("type_name", &self.type_name)
            .finish()
    }
}

type FactoryFn = dyn Fn(ComponentConfig, ComponentContext) -> BoxFuture<'static, anyhow::Result<ComponentHandle>>
    + Send
    + Sync;

/// Builds one component from its configuration block and a dependency context.
///
/// The factory runs in its own task and may await `ctx.find(...)` any number
/// of times; each lookup suspends until the dependency settles.
#[derive(Clone)]
pub struct ComponentFactory(Arc<FactoryFn>);

impl ComponentFactory {
    pub fn new<T, F, Fut>(f: F) -> Self
    where
        T: Component,
        F: Fn(ComponentConfig, ComponentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self(Arc::new(move |config, ctx| {
            let fut = f(config, ctx);
            async move { fut.await.map(ComponentHandle::new) }.boxed()
        }))
    }

    /// Factory for a component that needs neither config nor dependencies.
    pub fn from_default<T: Component + Default>() -> Self {
        Self::new(|_, _| async { Ok(T::default()) })
    }

    pub(crate) fn build(
        &self,
        config: ComponentConfig,
        ctx: ComponentContext,
    ) -> BoxFuture<'static, anyhow::Result<ComponentHandle>> {
        (self.0)(config, ctx)
    }
}

impl std::fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ComponentFactory")
    }
}
