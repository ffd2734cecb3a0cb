//! 声明源
//!
//! 启动时通过构建器 API 或编译期注册（`#[intercepted]` + inventory）填充的声明表。

use crate::declaration::{
    ConfigComponent, ConfigKey, IgnoreDeclaration, InterceptionDeclaration, InterceptorKind,
};
use crate::method::{MethodId, TypeKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 声明源 trait
///
/// 对类型静态元数据的抽象查询，与具体的反射机制无关。
pub trait DeclarationSource: Send + Sync {
    /// 类级别拦截声明
    fn class_declarations(&self, type_key: &TypeKey) -> Vec<InterceptionDeclaration>;

    /// 方法级别拦截声明
    fn method_declarations(&self, type_key: &TypeKey) -> Vec<InterceptionDeclaration>;

    /// 忽略声明
    fn ignore_declarations(&self, type_key: &TypeKey) -> Vec<IgnoreDeclaration>;
}

/// 多个声明源按顺序拼接
#[derive(Clone, Default)]
pub struct SourceSet {
    sources: Vec<Arc<dyn DeclarationSource>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: Arc<dyn DeclarationSource>) {
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl DeclarationSource for SourceSet {
    fn class_declarations(&self, type_key: &TypeKey) -> Vec<InterceptionDeclaration> {
        self.sources
            .iter()
            .flat_map(|s| s.class_declarations(type_key))
            .collect()
    }

    fn method_declarations(&self, type_key: &TypeKey) -> Vec<InterceptionDeclaration> {
        self.sources
            .iter()
            .flat_map(|s| s.method_declarations(type_key))
            .collect()
    }

    fn ignore_declarations(&self, type_key: &TypeKey) -> Vec<IgnoreDeclaration> {
        self.sources
            .iter()
            .flat_map(|s| s.ignore_declarations(type_key))
            .collect()
    }
}

#[derive(Default)]
struct TypeDeclarations {
    class: Vec<InterceptionDeclaration>,
    method: Vec<InterceptionDeclaration>,
    ignore: Vec<IgnoreDeclaration>,
    revision: u64,
}

/// 声明注册表
///
/// 按注册顺序保存每个类型的声明；同一目标上的重复声明只保留第一条。
/// 每次新增声明都会递增该类型的修订号，选择缓存据此判断是否过期。
#[derive(Default)]
pub struct DeclarationRegistry {
    types: RwLock<HashMap<TypeKey, TypeDeclarations>>,
}

impl DeclarationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册拦截声明
    ///
    /// `method` 为 `None` 时是类级别声明。返回 `false` 表示声明重复而被忽略。
    pub fn register_declaration(
        &self,
        type_key: TypeKey,
        method: Option<MethodId>,
        kind: InterceptorKind,
        priority: Option<i32>,
        config_key: ConfigKey,
    ) -> bool {
        let declaration = InterceptionDeclaration::new(method, kind, priority, config_key);
        let mut types = self.types.write();
        let entry = types.entry(type_key).or_default();
        let bucket = match declaration.target_method() {
            Some(_) => &mut entry.method,
            None => &mut entry.class,
        };

        if bucket.iter().any(|existing| existing.duplicates(&declaration)) {
            tracing::debug!(
                component = %type_key,
                interceptor = %kind,
                "Duplicate interception declaration ignored"
            );
            return false;
        }

        tracing::debug!(
            component = %type_key,
            interceptor = %kind,
            method = ?declaration.target_method().map(|m| m.to_string()),
            "Registered interception declaration"
        );
        bucket.push(declaration);
        entry.revision += 1;
        true
    }

    /// 注册忽略声明
    pub fn register_ignore(&self, type_key: TypeKey, method: MethodId, kind: InterceptorKind) {
        let ignore = IgnoreDeclaration::new(method, kind);
        let mut types = self.types.write();
        let entry = types.entry(type_key).or_default();
        if !entry.ignore.contains(&ignore) {
            entry.ignore.push(ignore);
            entry.revision += 1;
        }
    }

    /// 类型声明的修订号，没有声明时为 0
    pub fn revision(&self, type_key: &TypeKey) -> u64 {
        self.types
            .read()
            .get(type_key)
            .map_or(0, |entry| entry.revision)
    }

    /// 针对某个类型的构建器
    pub fn declare<T: ?Sized + 'static>(&self) -> DeclarationBuilder<'_> {
        DeclarationBuilder {
            registry: self,
            type_key: TypeKey::of::<T>(),
        }
    }

    /// 是否有该类型的声明
    pub fn contains(&self, type_key: &TypeKey) -> bool {
        self.types.read().contains_key(type_key)
    }

    /// 已登记声明的类型数量
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    /// 加载所有通过 `#[intercepted]` 提交的声明
    ///
    /// 返回加载的记录数量
    pub fn load_submissions(&self) -> usize {
        let mut loaded = 0;
        for submission in inventory::iter::<DeclarationSubmission> {
            let type_key = (submission.target_type)();
            for entry in submission.entries {
                match entry {
                    SubmittedDeclaration::Intercept {
                        method,
                        kind,
                        priority,
                        config,
                    } => {
                        self.register_declaration(
                            type_key,
                            method.clone(),
                            kind(),
                            *priority,
                            ConfigKey::from_static(*config),
                        );
                    }
                    SubmittedDeclaration::Ignore { method, kind } => {
                        self.register_ignore(type_key, method.clone(), kind());
                    }
                }
                loaded += 1;
            }
        }
        tracing::debug!("Loaded {} interception declaration(s) from inventory", loaded);
        loaded
    }
}

impl DeclarationSource for DeclarationRegistry {
    fn class_declarations(&self, type_key: &TypeKey) -> Vec<InterceptionDeclaration> {
        self.types
            .read()
            .get(type_key)
            .map(|t| t.class.clone())
            .unwrap_or_default()
    }

    fn method_declarations(&self, type_key: &TypeKey) -> Vec<InterceptionDeclaration> {
        self.types
            .read()
            .get(type_key)
            .map(|t| t.method.clone())
            .unwrap_or_default()
    }

    fn ignore_declarations(&self, type_key: &TypeKey) -> Vec<IgnoreDeclaration> {
        self.types
            .read()
            .get(type_key)
            .map(|t| t.ignore.clone())
            .unwrap_or_default()
    }
}

/// 声明构建器
///
/// ```ignore
/// registry
///     .declare::<OrderService>()
///     .class::<LoggingInterceptor>()
///     .method_with::<RetryInterceptor>(<dyn OrderApi>::PLACE, 0, ConfigKey::empty().with(3))
///     .ignore::<LoggingInterceptor>(<dyn OrderApi>::TOTAL);
/// ```
pub struct DeclarationBuilder<'a> {
    registry: &'a DeclarationRegistry,
    type_key: TypeKey,
}

impl<'a> DeclarationBuilder<'a> {
    pub fn class<K: ?Sized + 'static>(self) -> Self {
        self.registry.register_declaration(
            self.type_key,
            None,
            InterceptorKind::of::<K>(),
            None,
            ConfigKey::empty(),
        );
        self
    }

    pub fn class_with<K: ?Sized + 'static>(
        self,
        priority: impl Into<Option<i32>>,
        config_key: ConfigKey,
    ) -> Self {
        self.registry.register_declaration(
            self.type_key,
            None,
            InterceptorKind::of::<K>(),
            priority.into(),
            config_key,
        );
        self
    }

    pub fn method<K: ?Sized + 'static>(self, method: MethodId) -> Self {
        self.registry.register_declaration(
            self.type_key,
            Some(method),
            InterceptorKind::of::<K>(),
            None,
            ConfigKey::empty(),
        );
        self
    }

    pub fn method_with<K: ?Sized + 'static>(
        self,
        method: MethodId,
        priority: impl Into<Option<i32>>,
        config_key: ConfigKey,
    ) -> Self {
        self.registry.register_declaration(
            self.type_key,
            Some(method),
            InterceptorKind::of::<K>(),
            priority.into(),
            config_key,
        );
        self
    }

    pub fn ignore<K: ?Sized + 'static>(self, method: MethodId) -> Self {
        self.registry
            .register_ignore(self.type_key, method, InterceptorKind::of::<K>());
        self
    }
}

/// 编译期提交的一条声明
pub enum SubmittedDeclaration {
    Intercept {
        method: Option<MethodId>,
        kind: fn() -> InterceptorKind,
        priority: Option<i32>,
        config: &'static [ConfigComponent],
    },
    Ignore {
        method: MethodId,
        kind: fn() -> InterceptorKind,
    },
}

/// 编译期提交的一组声明
///
/// 由 `#[intercepted]` 生成，一个 impl 块对应一条记录，记录内保持源码顺序。
pub struct DeclarationSubmission {
    pub target_type: fn() -> TypeKey,
    pub entries: &'static [SubmittedDeclaration],
}

impl DeclarationSubmission {
    pub const fn new(target_type: fn() -> TypeKey, entries: &'static [SubmittedDeclaration]) -> Self {
        Self {
            target_type,
            entries,
        }
    }
}

inventory::collect!(DeclarationSubmission);
