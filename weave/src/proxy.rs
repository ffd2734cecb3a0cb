//! 代理分发
//!
//! `#[interceptable]` 为能力接口生成转发代理，代理把每次调用交给 [`Dispatcher`]，
//! 由它找到方法对应的拦截链并以目标方法作为终点执行。

use crate::chain::InterceptorChain;
use crate::error::{InterceptError, InterceptResult};
use crate::invocation::{Arguments, InvocationResult, Outcome, Terminal};
use crate::method::{MethodId, TypeKey};
use crate::outcome::{downcast_value, resolve_now};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// 能力接口
///
/// 由 `#[interceptable]` 为 `dyn Trait` 实现。代理只能通过能力接口转发调用。
pub trait CapabilityInterface: Send + Sync + 'static {
    /// 接口名
    fn interface_name() -> &'static str;

    /// 接口声明的全部方法
    fn methods() -> &'static [MethodId];

    /// 用分发器包装目标，得到实现同一接口的代理
    fn wrap(target: Arc<Self>, dispatcher: Dispatcher) -> Arc<Self>;
}

struct DispatcherInner {
    target_type: TypeKey,
    chains: HashMap<MethodId, InterceptorChain>,
}

/// 调用分发器
///
/// 保存代理对象每个被拦截方法的拦截链。克隆开销很小，多个接口代理共享同一个分发器。
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(target_type: TypeKey, chains: HashMap<MethodId, InterceptorChain>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                target_type,
                chains,
            }),
        }
    }

    pub fn target_type(&self) -> TypeKey {
        self.inner.target_type
    }

    /// 方法是否有拦截器
    ///
    /// 没有拦截器的方法由代理直接调用目标，不产生拦截链开销。
    pub fn intercepts(&self, method: &MethodId) -> bool {
        self.inner
            .chains
            .get(method)
            .is_some_and(|chain| !chain.is_empty())
    }

    pub fn chain(&self, method: &MethodId) -> Option<&InterceptorChain> {
        self.inner.chains.get(method)
    }

    /// 被拦截的方法数量
    pub fn intercepted_methods(&self) -> usize {
        self.inner.chains.values().filter(|c| !c.is_empty()).count()
    }

    /// 执行方法的拦截链，得到延迟结果
    pub fn dispatch(&self, method: MethodId, arguments: Arguments, terminal: Terminal) -> Outcome {
        match self.inner.chains.get(&method) {
            Some(chain) => chain.invoke(self.inner.target_type, method, arguments, terminal),
            None => terminal(Arc::new(arguments)),
        }
    }

    /// 执行同步方法的拦截链
    pub fn dispatch_sync(
        &self,
        method: MethodId,
        arguments: Arguments,
        terminal: Terminal,
    ) -> InvocationResult {
        let outcome = self.dispatch(method.clone(), arguments, terminal);
        resolve_now(&method, outcome)
    }

    /// 异步调用并取回具体类型的返回值
    pub async fn call<T: Any + Send>(
        &self,
        method: MethodId,
        arguments: Arguments,
        terminal: Terminal,
    ) -> anyhow::Result<T> {
        let value = self.dispatch(method.clone(), arguments, terminal).await?;
        downcast_value(&method, value)
    }

    /// 同步调用并取回具体类型的返回值
    pub fn call_sync<T: Any + Send>(
        &self,
        method: MethodId,
        arguments: Arguments,
        terminal: Terminal,
    ) -> anyhow::Result<T> {
        let value = self.dispatch_sync(method.clone(), arguments, terminal)?;
        downcast_value(&method, value)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("target_type", &self.inner.target_type)
            .field("chains", &self.inner.chains)
            .finish()
    }
}

type AttachFn = dyn Fn(Arc<dyn Any + Send + Sync>, Option<&Dispatcher>) -> Option<Arc<dyn Any + Send + Sync>>
    + Send
    + Sync;

/// 组件暴露的一个能力接口
#[derive(Clone)]
pub struct ExposedInterface {
    key: TypeKey,
    name: &'static str,
    methods: &'static [MethodId],
    attach: Arc<AttachFn>,
}

impl ExposedInterface {
    /// 组件 `C` 通过 `cast` 暴露接口 `I`
    pub fn new<C, I>(cast: fn(Arc<C>) -> Arc<I>) -> Self
    where
        C: Send + Sync + 'static,
        I: ?Sized + CapabilityInterface,
    {
        Self {
            key: TypeKey::of::<I>(),
            name: I::interface_name(),
            methods: I::methods(),
            attach: Arc::new(
                move |component: Arc<dyn Any + Send + Sync>, dispatcher: Option<&Dispatcher>| {
                    let component = component.downcast::<C>().ok()?;
                    let target = cast(component);
                    let exposed = match dispatcher {
                        Some(dispatcher) => I::wrap(target, dispatcher.clone()),
                        None => target,
                    };
                    // Arc<dyn Trait> 本身不是 Any，再包一层
                    Some(Arc::new(exposed) as Arc<dyn Any + Send + Sync>)
                },
            ),
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn methods(&self) -> &'static [MethodId] {
        self.methods
    }

    pub(crate) fn attach(
        &self,
        component: Arc<dyn Any + Send + Sync>,
        dispatcher: Option<&Dispatcher>,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        (self.attach)(component, dispatcher)
    }
}

impl fmt::Debug for ExposedInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExposedInterface")
            .field("name", &self.name)
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// 组件登记：组件类型及其暴露的能力接口
#[derive(Debug, Clone)]
pub struct ComponentRegistration {
    type_key: TypeKey,
    interfaces: Vec<ExposedInterface>,
}

impl ComponentRegistration {
    pub fn new(type_key: TypeKey) -> Self {
        Self {
            type_key,
            interfaces: Vec::new(),
        }
    }

    /// 类型化的构建器
    ///
    /// ```ignore
    /// ComponentRegistration::of::<OrderService>()
    ///     .expose::<dyn OrderApi>(|service| service)
    ///     .expose::<dyn InventoryApi>(|service| service)
    /// ```
    pub fn of<C: Send + Sync + 'static>() -> ComponentBuilder<C> {
        ComponentBuilder {
            registration: Self::new(TypeKey::of::<C>()),
            _component: PhantomData,
        }
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    pub fn interfaces(&self) -> &[ExposedInterface] {
        &self.interfaces
    }

    /// 追加接口，同一接口只保留一次
    pub fn add_interface(&mut self, interface: ExposedInterface) {
        if self.interfaces.iter().any(|i| i.key == interface.key) {
            return;
        }
        self.interfaces.push(interface);
    }

    /// 合并另一份同类型的登记
    pub fn merge(&mut self, other: ComponentRegistration) {
        for interface in other.interfaces {
            self.add_interface(interface);
        }
    }

    /// 全部接口方法（去重，保持接口声明顺序）
    pub fn methods(&self) -> Vec<&'static MethodId> {
        let mut methods: Vec<&'static MethodId> = Vec::new();
        for method in self.interfaces.iter().flat_map(|i| i.methods.iter()) {
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        methods
    }
}

/// [`ComponentRegistration`] 的类型化构建器
pub struct ComponentBuilder<C> {
    registration: ComponentRegistration,
    _component: PhantomData<fn() -> C>,
}

impl<C: Send + Sync + 'static> ComponentBuilder<C> {
    pub fn expose<I: ?Sized + CapabilityInterface>(mut self, cast: fn(Arc<C>) -> Arc<I>) -> Self {
        self.registration
            .add_interface(ExposedInterface::new::<C, I>(cast));
        self
    }

    pub fn build(self) -> ComponentRegistration {
        self.registration
    }
}

impl<C: Send + Sync + 'static> From<ComponentBuilder<C>> for ComponentRegistration {
    fn from(builder: ComponentBuilder<C>) -> Self {
        builder.build()
    }
}

/// 编译期提交的接口暴露记录
///
/// 由 `#[intercepted]` 为 `impl Trait for Component` 生成。
pub struct InterfaceSubmission {
    pub component: fn() -> TypeKey,
    pub expose: fn() -> ExposedInterface,
}

impl InterfaceSubmission {
    pub const fn new(component: fn() -> TypeKey, expose: fn() -> ExposedInterface) -> Self {
        Self { component, expose }
    }
}

inventory::collect!(InterfaceSubmission);

/// 代理后的组件
///
/// 按能力接口取出代理对象。未被拦截的组件返回的是目标本身。
#[derive(Clone)]
pub struct ProxiedComponent {
    type_key: TypeKey,
    intercepted: bool,
    interfaces: HashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>,
    target: Arc<dyn Any + Send + Sync>,
}

impl ProxiedComponent {
    pub(crate) fn new(
        registration: &ComponentRegistration,
        target: Arc<dyn Any + Send + Sync>,
        dispatcher: Option<&Dispatcher>,
    ) -> InterceptResult<Self> {
        let mut interfaces = HashMap::with_capacity(registration.interfaces.len());
        for interface in &registration.interfaces {
            let exposed = interface.attach(target.clone(), dispatcher).ok_or_else(|| {
                InterceptError::configuration(format!(
                    "component instance does not match registered type '{}'",
                    registration.type_key.name()
                ))
            })?;
            interfaces.insert(interface.key.id(), (interface.name, exposed));
        }

        Ok(Self {
            type_key: registration.type_key,
            intercepted: dispatcher.is_some(),
            interfaces,
            target,
        })
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// 是否包装了拦截链
    pub fn is_intercepted(&self) -> bool {
        self.intercepted
    }

    /// 按接口取出代理
    pub fn get<I: ?Sized + CapabilityInterface>(&self) -> Option<Arc<I>> {
        let (_, exposed) = self.interfaces.get(&TypeId::of::<I>())?;
        exposed.downcast_ref::<Arc<I>>().cloned()
    }

    /// 按接口取出代理，接口未暴露时返回 `UnknownInterface`
    pub fn require<I: ?Sized + CapabilityInterface>(&self) -> InterceptResult<Arc<I>> {
        self.get::<I>().ok_or_else(|| InterceptError::UnknownInterface {
            component: self.type_key.name().to_string(),
            interface: I::interface_name().to_string(),
        })
    }

    /// 暴露的接口名
    pub fn interface_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.interfaces.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names
    }

    /// 未包装的目标对象
    pub fn target(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.target
    }
}

impl fmt::Debug for ProxiedComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxiedComponent")
            .field("type_key", &self.type_key)
            .field("intercepted", &self.intercepted)
            .field("interfaces", &self.interface_names())
            .finish()
    }
}
