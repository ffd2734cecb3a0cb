//! 拦截器目录
//!
//! 登记可用的拦截器类型及其工厂，负责把声明中的类型解析为实例。

use crate::declaration::{CapabilityContract, InterceptorKind};
use crate::error::{InterceptError, InterceptResult};
use crate::interceptor::{Interceptor, InterceptorInstance, InterceptorType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 拦截器工厂
pub type InterceptorFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn Interceptor>> + Send + Sync>;

/// 拦截器解析器
///
/// 把声明中的拦截器类型变成一个新的、尚未初始化的实例。
/// 每条声明解析一次，解析失败时代理创建立即失败。
pub trait InterceptorResolver: Send + Sync {
    fn resolve(&self, kind: &InterceptorKind) -> InterceptResult<InterceptorInstance>;
}

#[derive(Clone)]
struct CatalogEntry {
    default_priority: i32,
    factory: InterceptorFactory,
}

/// 拦截器目录
#[derive(Default)]
pub struct InterceptorCatalog {
    entries: RwLock<HashMap<InterceptorKind, CatalogEntry>>,
}

impl InterceptorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记拦截器类型
    pub fn register<T: InterceptorType>(&self) {
        self.register_factory(
            InterceptorKind::of::<T>(),
            T::DEFAULT_PRIORITY,
            Arc::new(create_boxed::<T>),
        );
    }

    /// 以自定义工厂登记拦截器类型
    ///
    /// 同一类型再次登记时覆盖旧的工厂。
    pub fn register_factory(
        &self,
        kind: InterceptorKind,
        default_priority: i32,
        factory: InterceptorFactory,
    ) {
        let previous = self.entries.write().insert(
            kind,
            CatalogEntry {
                default_priority,
                factory,
            },
        );
        if previous.is_some() {
            tracing::warn!(interceptor = %kind, "Interceptor registered twice, factory replaced");
        } else {
            tracing::debug!(interceptor = %kind, default_priority, "Registered interceptor");
        }
    }

    /// 登记所有通过 inventory 提交的拦截器
    pub fn load_inventory(&self) -> usize {
        let mut loaded = 0;
        for registration in inventory::iter::<InterceptorRegistration> {
            let create = registration.create;
            self.register_factory(
                (registration.kind)(),
                registration.default_priority,
                Arc::new(create),
            );
            loaded += 1;
        }
        tracing::debug!("Loaded {} interceptor(s) from inventory", loaded);
        loaded
    }

    pub fn contains(&self, kind: &InterceptorKind) -> bool {
        self.entries.read().contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// 已登记的类型名（排序后）
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.read().keys().map(|k| k.short_name()).collect();
        names.sort_unstable();
        names
    }
}

impl CapabilityContract for InterceptorCatalog {
    fn satisfies(&self, kind: &InterceptorKind) -> bool {
        self.contains(kind)
    }

    fn default_priority(&self, kind: &InterceptorKind) -> i32 {
        self.entries
            .read()
            .get(kind)
            .map(|e| e.default_priority)
            .unwrap_or(crate::interceptor::DEFAULT_PRIORITY)
    }
}

impl InterceptorResolver for InterceptorCatalog {
    fn resolve(&self, kind: &InterceptorKind) -> InterceptResult<InterceptorInstance> {
        // 工厂在锁外调用，工厂内部可以再次访问目录
        let entry = self.entries.read().get(kind).cloned().ok_or_else(|| {
            InterceptError::resolution(
                kind.name(),
                anyhow::anyhow!("interceptor '{}' is not registered", kind.short_name()),
            )
        })?;

        let interceptor = (entry.factory)().map_err(|e| InterceptError::resolution(kind.name(), e))?;
        tracing::trace!(interceptor = %kind, "Resolved interceptor instance");
        Ok(InterceptorInstance::new(*kind, interceptor).with_priority(entry.default_priority))
    }
}

/// 编译期登记的拦截器
///
/// ```ignore
/// inventory::submit! {
///     InterceptorRegistration::of::<AuditInterceptor>()
/// }
/// ```
pub struct InterceptorRegistration {
    pub kind: fn() -> InterceptorKind,
    pub default_priority: i32,
    pub create: fn() -> anyhow::Result<Box<dyn Interceptor>>,
}

impl InterceptorRegistration {
    pub const fn of<T: InterceptorType>() -> Self {
        Self {
            kind: InterceptorKind::of::<T>,
            default_priority: T::DEFAULT_PRIORITY,
            create: create_boxed::<T>,
        }
    }
}

fn create_boxed<T: InterceptorType>() -> anyhow::Result<Box<dyn Interceptor>> {
    Ok(Box::new(T::create()?))
}

inventory::collect!(InterceptorRegistration);
