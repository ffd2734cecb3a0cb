//! 拦截框架入口
//!
//! `Weaver` 把声明发现、拦截器选择、拦截器解析和代理构建串起来：
//!
//! ```ignore
//! let weaver = Weaver::builder().config(WeaveConfig::from_file("weave.toml")?).build();
//! weaver.register_component(ComponentRegistration::of::<OrderService>().expose::<dyn OrderApi>(|s| s));
//! weaver
//!     .declare::<OrderService>()
//!     .class::<LoggingInterceptor>()
//!     .method_with::<RetryInterceptor>(<dyn OrderApi>::PLACE, 0, ConfigKey::empty().with(3));
//!
//! let proxied = weaver.build_proxy(Arc::new(OrderService::default()))?;
//! let orders = proxied.require::<dyn OrderApi>()?;
//! ```

use crate::catalog::{InterceptorCatalog, InterceptorResolver};
use crate::chain::InterceptorChain;
use crate::config::WeaveConfig;
use crate::declaration::{discover, ConfigKey, DeclarationTable, InterceptorKind};
use crate::error::{InterceptError, InterceptResult};
use crate::interceptor::{InitContext, InterceptorType, SharedInterceptor};
use crate::method::{MethodId, TypeKey};
use crate::proxy::{ComponentRegistration, Dispatcher, InterfaceSubmission, ProxiedComponent};
use crate::selection::{Selection, SelectionEngine};
use crate::source::{DeclarationBuilder, DeclarationRegistry, DeclarationSource, SourceSet};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// 全局 Weaver（自动加载编译期注册的拦截器、声明和组件）
static GLOBAL_WEAVER: Lazy<Arc<Weaver>> = Lazy::new(|| {
    let config = WeaveConfig::default().apply_env();
    Arc::new(Weaver::builder().config(config).with_inventory(true).build())
});

/// 获取全局 Weaver
pub fn global_weaver() -> Arc<Weaver> {
    GLOBAL_WEAVER.clone()
}

/// Weaver 构建器
pub struct WeaverBuilder {
    config: WeaveConfig,
    catalog: Option<Arc<InterceptorCatalog>>,
    resolver: Option<Arc<dyn InterceptorResolver>>,
    sources: Vec<Arc<dyn DeclarationSource>>,
    inventory: bool,
}

impl WeaverBuilder {
    fn new() -> Self {
        Self {
            config: WeaveConfig::default(),
            catalog: None,
            resolver: None,
            sources: Vec::new(),
            inventory: true,
        }
    }

    pub fn config(mut self, config: WeaveConfig) -> Self {
        self.config = config;
        self
    }

    /// 使用已有的拦截器目录
    pub fn catalog(mut self, catalog: Arc<InterceptorCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// 自定义拦截器解析器（默认由目录解析）
    ///
    /// 声明引用的拦截器类型仍须在目录中登记。
    pub fn resolver(mut self, resolver: Arc<dyn InterceptorResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// 追加声明源，排在内置注册表之后
    pub fn source(mut self, source: Arc<dyn DeclarationSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// 是否加载编译期注册的记录（默认加载）
    pub fn with_inventory(mut self, inventory: bool) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn build(self) -> Weaver {
        let catalog = self.catalog.unwrap_or_default();
        let registry = Arc::new(DeclarationRegistry::new());
        let resolver = self
            .resolver
            .unwrap_or_else(|| catalog.clone() as Arc<dyn InterceptorResolver>);

        let mut sources = SourceSet::new();
        sources.push(registry.clone());
        for source in self.sources {
            sources.push(source);
        }

        let weaver = Weaver {
            config: self.config,
            registry,
            sources,
            catalog,
            resolver,
            selection: SelectionEngine::new(),
            components: RwLock::new(HashMap::new()),
        };

        if self.inventory {
            weaver.load_inventory();
        }

        tracing::debug!(
            enabled = weaver.config.enabled,
            interceptors = weaver.catalog.len(),
            "Weaver initialized"
        );
        weaver
    }
}

/// 拦截框架入口
pub struct Weaver {
    config: WeaveConfig,
    registry: Arc<DeclarationRegistry>,
    sources: SourceSet,
    catalog: Arc<InterceptorCatalog>,
    resolver: Arc<dyn InterceptorResolver>,
    selection: SelectionEngine,
    components: RwLock<HashMap<TypeId, ComponentRegistration>>,
}

impl Weaver {
    pub fn builder() -> WeaverBuilder {
        WeaverBuilder::new()
    }

    /// 默认配置，加载编译期注册的记录
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn config(&self) -> &WeaveConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<InterceptorCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<DeclarationRegistry> {
        &self.registry
    }

    fn load_inventory(&self) {
        self.catalog.load_inventory();
        self.registry.load_submissions();

        let mut exposed = 0;
        for submission in inventory::iter::<InterfaceSubmission> {
            let type_key = (submission.component)();
            let mut registration = ComponentRegistration::new(type_key);
            registration.add_interface((submission.expose)());
            self.register_component(registration);
            exposed += 1;
        }
        tracing::debug!("Loaded {} exposed interface(s) from inventory", exposed);
    }

    /// 登记拦截器类型
    pub fn register_interceptor<T: InterceptorType>(&self) {
        self.catalog.register::<T>();
    }

    /// 注册拦截声明
    ///
    /// `method` 为 `None` 时是类级别声明；未指定优先级时取拦截器类型的默认优先级。
    /// 返回 `false` 表示与已有声明重复而被忽略。
    pub fn register_declaration(
        &self,
        type_key: TypeKey,
        method: Option<MethodId>,
        kind: InterceptorKind,
        priority: Option<i32>,
        config_key: ConfigKey,
    ) -> bool {
        self.registry
            .register_declaration(type_key, method, kind, priority, config_key)
    }

    /// 为组件类型声明拦截
    ///
    /// 新声明提升类型的声明版本，之后的选择和构建会看到它。
    pub fn declare<C: ?Sized + 'static>(&self) -> DeclarationBuilder<'_> {
        self.registry.declare::<C>()
    }

    /// 登记组件及其暴露的能力接口
    ///
    /// 同一组件多次登记时合并接口。
    pub fn register_component(&self, registration: impl Into<ComponentRegistration>) {
        let registration = registration.into();
        let type_key = registration.type_key();
        let mut components = self.components.write();
        match components.get_mut(&type_key.id()) {
            Some(existing) => existing.merge(registration),
            None => {
                components.insert(type_key.id(), registration);
            }
        }
        tracing::debug!(component = %type_key, "Registered component");
    }

    pub fn is_registered(&self, type_id: TypeId) -> bool {
        self.components.read().contains_key(&type_id)
    }

    /// 类型冻结后的声明表
    pub fn declaration_table(&self, type_key: TypeKey) -> InterceptResult<Arc<DeclarationTable>> {
        let revision = self.registry.revision(&type_key);
        self.selection.table(type_key, revision, || {
            let table = discover(type_key, &self.sources, &*self.catalog)?;
            Ok(table.without_kinds(|kind| self.config.is_disabled(kind)))
        })
    }

    /// 丢弃类型的声明表缓存
    ///
    /// 注册表内的声明变化会自动生效；外部声明源的内容变化后需要调用。
    pub fn invalidate(&self, type_key: &TypeKey) {
        self.selection.invalidate(type_key);
    }

    /// 方法生效的拦截器类型（按执行顺序）
    pub fn select(&self, type_key: &TypeKey, method: &MethodId) -> InterceptResult<Vec<InterceptorKind>> {
        let table = self.declaration_table(*type_key)?;
        Ok(self.selection.select(&table, method).kinds().to_vec())
    }

    /// 为组件构建代理
    pub fn build_proxy<C: Send + Sync + 'static>(&self, component: Arc<C>) -> InterceptResult<ProxiedComponent> {
        self.build(TypeId::of::<C>(), std::any::type_name::<C>(), component)
    }

    /// 为类型擦除的组件构建代理
    pub fn build_proxy_erased(&self, component: Arc<dyn Any + Send + Sync>) -> InterceptResult<ProxiedComponent> {
        let type_id = Any::type_id(&*component);
        self.build(type_id, "<erased>", component)
    }

    fn build(
        &self,
        type_id: TypeId,
        type_name: &str,
        component: Arc<dyn Any + Send + Sync>,
    ) -> InterceptResult<ProxiedComponent> {
        let registration = self.components.read().get(&type_id).cloned().ok_or_else(|| {
            InterceptError::configuration(format!(
                "'{}' is not a registered component, it exposes no capability interface",
                type_name
            ))
        })?;
        let type_key = registration.type_key();

        if registration.interfaces().is_empty() {
            return Err(InterceptError::configuration(format!(
                "component '{}' exposes no capability interface",
                type_key.name()
            )));
        }

        if !self.config.enabled {
            tracing::debug!(component = %type_key, "Interception disabled, component left unwrapped");
            return ProxiedComponent::new(&registration, component, None);
        }

        let table = self.declaration_table(type_key)?;
        let methods = registration.methods();
        warn_unexposed_targets(&table, &methods);

        // 即使没有方法选中，声明的拦截器也必须能解析和初始化
        let instances = self.instantiate(&table)?;
        let selections: Vec<(MethodId, Selection)> = methods
            .iter()
            .map(|method| ((*method).clone(), self.selection.select(&table, method)))
            .filter(|(_, selection)| !selection.is_empty())
            .collect();

        if selections.is_empty() {
            tracing::debug!(component = %type_key, "No interceptor applies, component left unwrapped");
            return ProxiedComponent::new(&registration, component, None);
        }

        let chains: HashMap<MethodId, InterceptorChain> = selections
            .into_iter()
            .map(|(method, selection)| {
                let interceptors = selection
                    .refs()
                    .iter()
                    .map(|r| instances[r.index()].clone())
                    .collect();
                (method, InterceptorChain::new(interceptors))
            })
            .collect();

        let dispatcher = Dispatcher::new(type_key, chains);
        tracing::info!(
            component = %type_key,
            interfaces = registration.interfaces().len(),
            methods = dispatcher.intercepted_methods(),
            interceptors = instances.len(),
            "Built interception proxy"
        );
        ProxiedComponent::new(&registration, component, Some(&dispatcher))
    }

    /// 每条声明解析一个新实例并初始化（类级别在前）
    fn instantiate(&self, table: &DeclarationTable) -> InterceptResult<Vec<SharedInterceptor>> {
        let mut instances = Vec::with_capacity(table.len());
        for (_, declaration) in table.declarations() {
            let mut instance = self
                .resolver
                .resolve(&declaration.kind())?
                .with_priority(declaration.priority());
            instance.initialize(&InitContext::new(table.type_key(), declaration))?;
            instances.push(instance.into_shared()?);
        }
        Ok(instances)
    }
}

impl Default for Weaver {
    fn default() -> Self {
        Self::new()
    }
}

fn warn_unexposed_targets(table: &DeclarationTable, methods: &[&'static MethodId]) {
    for declaration in table.method_declarations() {
        if let Some(target) = declaration.target_method() {
            if !methods.iter().any(|method| *method == target) {
                tracing::warn!(
                    component = %table.type_key(),
                    method = %target,
                    interceptor = %declaration.kind(),
                    "Declaration targets a method that no exposed interface declares"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::sync_terminal;
    use crate::interceptor::Interceptor;
    use crate::invocation::{value, Arguments, Invocation, InvocationResult};
    use crate::outcome::downcast_value;
    use crate::proxy::CapabilityInterface;
    use async_trait::async_trait;

    trait Greeter: Send + Sync {
        fn greet(&self) -> anyhow::Result<String>;
    }

    impl dyn Greeter {
        const GREET: MethodId = MethodId::new("greet", "()->anyhow::Result<String>");
    }

    struct GreeterProxy {
        target: Arc<dyn Greeter>,
        dispatcher: Dispatcher,
    }

    impl Greeter for GreeterProxy {
        fn greet(&self) -> anyhow::Result<String> {
            if !self.dispatcher.intercepts(&<dyn Greeter>::GREET) {
                return self.target.greet();
            }
            let target = self.target.clone();
            let terminal = sync_terminal(move |_: &Arguments| target.greet().map(value));
            self.dispatcher
                .call_sync::<String>(<dyn Greeter>::GREET, Arguments::new(), terminal)
        }
    }

    impl CapabilityInterface for dyn Greeter {
        fn interface_name() -> &'static str {
            "Greeter"
        }

        fn methods() -> &'static [MethodId] {
            static METHODS: &[MethodId] = &[<dyn Greeter>::GREET];
            METHODS
        }

        fn wrap(target: Arc<Self>, dispatcher: Dispatcher) -> Arc<Self> {
            Arc::new(GreeterProxy { target, dispatcher })
        }
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> anyhow::Result<String> {
            Ok("hello".to_string())
        }
    }

    struct Unexposed;

    /// 给结果加上配置的后缀
    #[derive(Default)]
    struct Suffix {
        suffix: String,
    }

    #[async_trait]
    impl Interceptor for Suffix {
        fn initialize(&mut self, context: &InitContext<'_>) -> anyhow::Result<()> {
            self.suffix = context.config_key().str(0).unwrap_or("!").to_string();
            Ok(())
        }

        async fn intercept(&self, invocation: Invocation) -> InvocationResult {
            let result = invocation.proceed().await?;
            let text = downcast_value::<String>(invocation.method(), result)?;
            Ok(value(format!("{}{}", text, self.suffix)))
        }
    }

    impl InterceptorType for Suffix {
        fn create() -> anyhow::Result<Self> {
            Ok(Suffix::default())
        }
    }

    /// 后端不可用，无法创建
    struct Broken;

    #[async_trait]
    impl Interceptor for Broken {
        async fn intercept(&self, invocation: Invocation) -> InvocationResult {
            invocation.proceed().await
        }
    }

    impl InterceptorType for Broken {
        fn create() -> anyhow::Result<Self> {
            anyhow::bail!("no backend")
        }
    }

    struct NotAnInterceptor;

    fn weaver(config: WeaveConfig) -> Weaver {
        let weaver = Weaver::builder().config(config).with_inventory(false).build();
        weaver.register_interceptor::<Suffix>();
        weaver.register_component(ComponentRegistration::of::<English>().expose::<dyn Greeter>(|e| e));
        weaver
    }

    #[test]
    fn test_build_proxy_applies_declarations() {
        let weaver = weaver(WeaveConfig::default());
        weaver
            .declare::<English>()
            .class_with::<Suffix>(2, ConfigKey::empty().with("?"))
            .method_with::<Suffix>(<dyn Greeter>::GREET, 1, ConfigKey::empty().with("!"));

        let proxied = weaver.build_proxy(Arc::new(English)).unwrap();
        let greeter = proxied.require::<dyn Greeter>().unwrap();

        // 方法级别声明覆盖了同类型的类级别声明
        assert_eq!(greeter.greet().unwrap(), "hello!");
        assert!(proxied.is_intercepted());
    }

    #[test]
    fn test_select_reports_kinds() {
        let weaver = weaver(WeaveConfig::default());
        weaver.declare::<English>().class::<Suffix>();

        let kinds = weaver
            .select(&TypeKey::of::<English>(), &<dyn Greeter>::GREET)
            .unwrap();
        assert_eq!(kinds, vec![InterceptorKind::of::<Suffix>()]);
    }

    #[test]
    fn test_registration_invalidates_selection() {
        let weaver = weaver(WeaveConfig::default());
        let ty = TypeKey::of::<English>();
        assert!(weaver.select(&ty, &<dyn Greeter>::GREET).unwrap().is_empty());

        weaver.register_declaration(ty, None, InterceptorKind::of::<Suffix>(), None, ConfigKey::empty());
        assert_eq!(weaver.select(&ty, &<dyn Greeter>::GREET).unwrap().len(), 1);
    }

    #[test]
    fn test_declarations_after_first_selection_take_effect() {
        let weaver = weaver(WeaveConfig::default());
        let builder = weaver.declare::<English>();
        assert!(!weaver.build_proxy(Arc::new(English)).unwrap().is_intercepted());

        // 提前取得的构建器和直接操作注册表都会提升声明版本
        builder.class_with::<Suffix>(2, ConfigKey::empty().with("?"));
        let proxied = weaver.build_proxy(Arc::new(English)).unwrap();
        assert_eq!(proxied.require::<dyn Greeter>().unwrap().greet().unwrap(), "hello?");

        weaver
            .registry()
            .declare::<English>()
            .method_with::<Suffix>(<dyn Greeter>::GREET, 1, ConfigKey::empty().with("!"));
        let proxied = weaver.build_proxy(Arc::new(English)).unwrap();
        assert_eq!(proxied.require::<dyn Greeter>().unwrap().greet().unwrap(), "hello!");
    }

    #[test]
    fn test_external_source_changes_need_invalidate() {
        let external = Arc::new(DeclarationRegistry::new());
        let weaver = Weaver::builder()
            .with_inventory(false)
            .source(external.clone())
            .build();
        weaver.register_interceptor::<Suffix>();
        weaver.register_component(ComponentRegistration::of::<English>().expose::<dyn Greeter>(|e| e));
        let ty = TypeKey::of::<English>();
        assert!(weaver.select(&ty, &<dyn Greeter>::GREET).unwrap().is_empty());

        external.declare::<English>().class::<Suffix>();
        assert!(weaver.select(&ty, &<dyn Greeter>::GREET).unwrap().is_empty());

        weaver.invalidate(&ty);
        assert_eq!(weaver.select(&ty, &<dyn Greeter>::GREET).unwrap().len(), 1);
    }

    #[test]
    fn test_no_declarations_leave_component_unwrapped() {
        let weaver = weaver(WeaveConfig::default());

        let proxied = weaver.build_proxy(Arc::new(English)).unwrap();
        assert!(!proxied.is_intercepted());
        assert_eq!(proxied.require::<dyn Greeter>().unwrap().greet().unwrap(), "hello");
    }

    #[test]
    fn test_disabled_weaver_leaves_component_unwrapped() {
        let weaver = weaver(WeaveConfig::default().enabled(false));
        weaver.declare::<English>().class::<Suffix>();

        let proxied = weaver.build_proxy(Arc::new(English)).unwrap();
        assert!(!proxied.is_intercepted());
    }

    #[test]
    fn test_disabled_interceptor_is_dropped() {
        let weaver = weaver(WeaveConfig::default().disable("Suffix"));
        weaver.declare::<English>().class::<Suffix>();

        let proxied = weaver.build_proxy(Arc::new(English)).unwrap();
        assert_eq!(proxied.require::<dyn Greeter>().unwrap().greet().unwrap(), "hello");
    }

    #[test]
    fn test_component_without_interfaces_is_rejected() {
        let weaver = weaver(WeaveConfig::default());
        let err = weaver.build_proxy(Arc::new(Unexposed)).unwrap_err();
        assert!(matches!(err, InterceptError::Configuration(_)));

        weaver.register_component(ComponentRegistration::of::<Unexposed>());
        let err = weaver.build_proxy(Arc::new(Unexposed)).unwrap_err();
        assert!(err.to_string().contains("exposes no capability interface"));
    }

    #[test]
    fn test_invalid_interceptor_kind_fails_fast() {
        let weaver = weaver(WeaveConfig::default());
        weaver.declare::<English>().class::<NotAnInterceptor>();

        let err = weaver.build_proxy(Arc::new(English)).unwrap_err();
        assert!(matches!(err, InterceptError::Configuration(_)));
    }

    #[test]
    fn test_broken_interceptor_fails_even_when_nothing_is_selected() {
        let weaver = weaver(WeaveConfig::default());
        weaver.register_interceptor::<Broken>();
        weaver
            .declare::<English>()
            .class::<Broken>()
            .ignore::<Broken>(<dyn Greeter>::GREET);

        let err = weaver.build_proxy(Arc::new(English)).unwrap_err();
        assert!(matches!(err, InterceptError::Resolution { .. }));
    }

    #[test]
    fn test_broken_interceptor_on_unexposed_method_fails() {
        let weaver = weaver(WeaveConfig::default());
        weaver.register_interceptor::<Broken>();
        weaver
            .declare::<English>()
            .method::<Broken>(MethodId::new("gone", "()->anyhow::Result<()>"));

        assert!(weaver
            .select(&TypeKey::of::<English>(), &<dyn Greeter>::GREET)
            .unwrap()
            .is_empty());
        let err = weaver.build_proxy(Arc::new(English)).unwrap_err();
        assert!(matches!(err, InterceptError::Resolution { .. }));
    }

    #[test]
    fn test_erased_component() {
        let weaver = weaver(WeaveConfig::default());
        weaver.declare::<English>().class::<Suffix>();

        let component: Arc<dyn Any + Send + Sync> = Arc::new(English);
        let proxied = weaver.build_proxy_erased(component).unwrap();
        assert_eq!(proxied.require::<dyn Greeter>().unwrap().greet().unwrap(), "hello!");
    }
}
