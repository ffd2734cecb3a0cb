//! 拦截声明模型
//!
//! 把类级别、方法级别的拦截声明以及忽略声明整理成每个类型一张声明表。

use crate::error::{InterceptError, InterceptResult};
use crate::interceptor::DEFAULT_PRIORITY;
use crate::method::{short_type_name, MethodId, TypeKey};
use crate::source::DeclarationSource;
use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// 拦截器类型标识
///
/// 声明可以引用任意类型，是否满足拦截器契约在 [`discover`] 时由 [`CapabilityContract`] 检查。
#[derive(Clone, Copy)]
pub struct InterceptorKind {
    id: TypeId,
    name: &'static str,
}

impl InterceptorKind {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }

    /// 按完整类型名或短名匹配（用于配置）
    pub fn matches_name(&self, name: &str) -> bool {
        self.name == name || self.short_name() == name
    }
}

impl PartialEq for InterceptorKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for InterceptorKind {}

impl Hash for InterceptorKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for InterceptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterceptorKind({})", self.short_name())
    }
}

impl fmt::Display for InterceptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// 配置键的单个分量
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigComponent {
    Bool(bool),
    Int(i64),
    Str(Cow<'static, str>),
}

impl fmt::Display for ConfigComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigComponent::Bool(b) => write!(f, "{}", b),
            ConfigComponent::Int(i) => write!(f, "{}", i),
            ConfigComponent::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for ConfigComponent {
    fn from(value: bool) -> Self {
        ConfigComponent::Bool(value)
    }
}

impl From<i64> for ConfigComponent {
    fn from(value: i64) -> Self {
        ConfigComponent::Int(value)
    }
}

impl From<i32> for ConfigComponent {
    fn from(value: i32) -> Self {
        ConfigComponent::Int(value.into())
    }
}

impl From<u32> for ConfigComponent {
    fn from(value: u32) -> Self {
        ConfigComponent::Int(value.into())
    }
}

impl From<&'static str> for ConfigComponent {
    fn from(value: &'static str) -> Self {
        ConfigComponent::Str(Cow::Borrowed(value))
    }
}

impl From<String> for ConfigComponent {
    fn from(value: String) -> Self {
        ConfigComponent::Str(Cow::Owned(value))
    }
}

/// 声明的配置键
///
/// 按值比较的元组，用来判断两个声明是否重复。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConfigKey(Cow<'static, [ConfigComponent]>);

impl ConfigKey {
    pub const fn empty() -> Self {
        Self(Cow::Borrowed(&[]))
    }

    pub const fn from_static(components: &'static [ConfigComponent]) -> Self {
        Self(Cow::Borrowed(components))
    }

    /// 追加一个分量
    pub fn with(self, component: impl Into<ConfigComponent>) -> Self {
        let mut components = self.0.into_owned();
        components.push(component.into());
        Self(Cow::Owned(components))
    }

    pub fn components(&self) -> &[ConfigComponent] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn int(&self, index: usize) -> Option<i64> {
        match self.0.get(index)? {
            ConfigComponent::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn bool(&self, index: usize) -> Option<bool> {
        match self.0.get(index)? {
            ConfigComponent::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn str(&self, index: usize) -> Option<&str> {
        match self.0.get(index)? {
            ConfigComponent::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Vec<ConfigComponent>> for ConfigKey {
    fn from(components: Vec<ConfigComponent>) -> Self {
        Self(Cow::Owned(components))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", component)?;
        }
        f.write_str(")")
    }
}

/// 声明作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationScope {
    /// 作用于类型的所有方法
    Class,
    /// 只作用于一个方法
    Method,
}

/// 拦截声明
///
/// 相等性只看拦截器类型和配置键，作用域与优先级不参与比较。
#[derive(Debug, Clone)]
pub struct InterceptionDeclaration {
    scope: DeclarationScope,
    target_method: Option<MethodId>,
    kind: InterceptorKind,
    priority: Option<i32>,
    config_key: ConfigKey,
}

impl InterceptionDeclaration {
    /// 类级别声明
    pub fn class(kind: InterceptorKind, priority: Option<i32>, config_key: ConfigKey) -> Self {
        Self {
            scope: DeclarationScope::Class,
            target_method: None,
            kind,
            priority,
            config_key,
        }
    }

    /// 方法级别声明
    pub fn method(
        method: MethodId,
        kind: InterceptorKind,
        priority: Option<i32>,
        config_key: ConfigKey,
    ) -> Self {
        Self {
            scope: DeclarationScope::Method,
            target_method: Some(method),
            kind,
            priority,
            config_key,
        }
    }

    /// 按是否指定方法选择作用域
    pub fn new(
        method: Option<MethodId>,
        kind: InterceptorKind,
        priority: Option<i32>,
        config_key: ConfigKey,
    ) -> Self {
        match method {
            Some(method) => Self::method(method, kind, priority, config_key),
            None => Self::class(kind, priority, config_key),
        }
    }

    pub fn scope(&self) -> DeclarationScope {
        self.scope
    }

    pub fn target_method(&self) -> Option<&MethodId> {
        self.target_method.as_ref()
    }

    pub fn kind(&self) -> InterceptorKind {
        self.kind
    }

    /// 生效的优先级，数值越小越先执行
    pub fn priority(&self) -> i32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn has_explicit_priority(&self) -> bool {
        self.priority.is_some()
    }

    pub fn config_key(&self) -> &ConfigKey {
        &self.config_key
    }

    /// 同一作用域目标上的重复声明
    pub fn duplicates(&self, other: &Self) -> bool {
        self.scope == other.scope && self.target_method == other.target_method && self == other
    }

    fn with_default_priority(mut self, priority: i32) -> Self {
        if self.priority.is_none() {
            self.priority = Some(priority);
        }
        self
    }
}

impl PartialEq for InterceptionDeclaration {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.config_key == other.config_key
    }
}

impl Eq for InterceptionDeclaration {}

impl Hash for InterceptionDeclaration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.config_key.hash(state);
    }
}

/// 忽略声明：让某个方法跳过指定类型的类级别声明
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IgnoreDeclaration {
    method: MethodId,
    ignored_kind: InterceptorKind,
}

impl IgnoreDeclaration {
    pub fn new(method: MethodId, ignored_kind: InterceptorKind) -> Self {
        Self {
            method,
            ignored_kind,
        }
    }

    pub fn method(&self) -> &MethodId {
        &self.method
    }

    pub fn ignored_kind(&self) -> InterceptorKind {
        self.ignored_kind
    }
}

/// 声明表中某条拦截声明的位置
///
/// 类级别声明在前，方法级别声明在后，与拦截器实例的创建顺序一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclarationRef(usize);

impl DeclarationRef {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 一个类型冻结后的声明表
#[derive(Debug, Clone)]
pub struct DeclarationTable {
    type_key: TypeKey,
    class_declarations: Vec<InterceptionDeclaration>,
    method_declarations: Vec<InterceptionDeclaration>,
    ignore_declarations: Vec<IgnoreDeclaration>,
}

impl DeclarationTable {
    pub fn new(
        type_key: TypeKey,
        class_declarations: Vec<InterceptionDeclaration>,
        method_declarations: Vec<InterceptionDeclaration>,
        ignore_declarations: Vec<IgnoreDeclaration>,
    ) -> Self {
        Self {
            type_key,
            class_declarations,
            method_declarations,
            ignore_declarations,
        }
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    pub fn class_declarations(&self) -> &[InterceptionDeclaration] {
        &self.class_declarations
    }

    pub fn method_declarations(&self) -> &[InterceptionDeclaration] {
        &self.method_declarations
    }

    pub fn ignore_declarations(&self) -> &[IgnoreDeclaration] {
        &self.ignore_declarations
    }

    pub fn len(&self) -> usize {
        self.class_declarations.len() + self.method_declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按引用取声明
    pub fn get(&self, declaration: DeclarationRef) -> &InterceptionDeclaration {
        let index = declaration.0;
        if index < self.class_declarations.len() {
            &self.class_declarations[index]
        } else {
            &self.method_declarations[index - self.class_declarations.len()]
        }
    }

    /// 全部拦截声明（类级别在前）
    pub fn declarations(&self) -> impl Iterator<Item = (DeclarationRef, &InterceptionDeclaration)> {
        self.class_declarations
            .iter()
            .chain(self.method_declarations.iter())
            .enumerate()
            .map(|(i, d)| (DeclarationRef(i), d))
    }

    pub fn class_refs(&self) -> impl Iterator<Item = DeclarationRef> {
        (0..self.class_declarations.len()).map(DeclarationRef)
    }

    pub fn method_refs(&self) -> impl Iterator<Item = DeclarationRef> {
        let offset = self.class_declarations.len();
        (offset..offset + self.method_declarations.len()).map(DeclarationRef)
    }

    /// 方法是否忽略了该类型的类级别声明
    pub fn is_ignored(&self, method: &MethodId, kind: InterceptorKind) -> bool {
        self.ignore_declarations
            .iter()
            .any(|ignore| ignore.method() == method && ignore.ignored_kind() == kind)
    }

    /// 去掉指定类型的所有拦截声明
    pub fn without_kinds(mut self, disabled: impl Fn(&InterceptorKind) -> bool) -> Self {
        let type_key = self.type_key;
        let keep = |declaration: &InterceptionDeclaration| {
            let drop = disabled(&declaration.kind());
            if drop {
                tracing::warn!(
                    component = %type_key,
                    interceptor = %declaration.kind(),
                    "Interceptor disabled by configuration, declaration dropped"
                );
            }
            !drop
        };
        self.class_declarations.retain(|d| keep(d));
        self.method_declarations.retain(|d| keep(d));
        self
    }
}

/// 拦截器能力契约
///
/// 判断声明引用的类型是否是拦截器，并给出它的默认优先级。
pub trait CapabilityContract: Send + Sync {
    fn satisfies(&self, kind: &InterceptorKind) -> bool;

    fn default_priority(&self, _kind: &InterceptorKind) -> i32 {
        DEFAULT_PRIORITY
    }
}

/// 发现一个类型的全部声明
///
/// 只读取声明源，不产生其他副作用。声明引用了不满足契约的类型时返回 `Configuration` 错误；
/// 没有显式优先级的声明取该拦截器类型的默认优先级。
pub fn discover(
    type_key: TypeKey,
    source: &dyn DeclarationSource,
    contract: &dyn CapabilityContract,
) -> InterceptResult<DeclarationTable> {
    let check = |declaration: InterceptionDeclaration| -> InterceptResult<InterceptionDeclaration> {
        let kind = declaration.kind();
        if !contract.satisfies(&kind) {
            return Err(InterceptError::configuration(format!(
                "the type '{}' declared on '{}' is not a valid interceptor",
                kind.name(),
                type_key.name()
            )));
        }
        Ok(declaration.with_default_priority(contract.default_priority(&kind)))
    };

    let class_declarations = source
        .class_declarations(&type_key)
        .into_iter()
        .map(&check)
        .collect::<InterceptResult<Vec<_>>>()?;

    let method_declarations = source
        .method_declarations(&type_key)
        .into_iter()
        .map(&check)
        .collect::<InterceptResult<Vec<_>>>()?;

    let ignore_declarations = source.ignore_declarations(&type_key);

    tracing::debug!(
        component = %type_key,
        class = class_declarations.len(),
        method = method_declarations.len(),
        ignore = ignore_declarations.len(),
        "Discovered interception declarations"
    );

    Ok(DeclarationTable::new(
        type_key,
        class_declarations,
        method_declarations,
        ignore_declarations,
    ))
}
