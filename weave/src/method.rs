//! 方法与类型标识

use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// 方法标识
///
/// 基于签名的稳定标识，与函数指针或反射对象无关：
/// 名称和签名都相同的两个标识表示同一个声明的方法。
///
/// `#[interceptable]` 会为每个接口方法生成常量，例如 `<dyn OrderApi>::PLACE`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    name: Cow<'static, str>,
    signature: Cow<'static, str>,
}

impl MethodId {
    /// 由静态字符串创建（可用于常量）
    pub const fn new(name: &'static str, signature: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            signature: Cow::Borrowed(signature),
        }
    }

    /// 由运行期字符串创建
    pub fn owned(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            signature: Cow::Owned(signature.into()),
        }
    }

    /// 方法名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 参数与返回值签名，例如 `(u32,String)->anyhow::Result<Order>`
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.signature)
    }
}

/// 类型标识
///
/// 以 `TypeId` 判等，保留类型名用于日志和配置匹配。
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// 完整类型名
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 去掉模块路径后的类型名
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// 截取类型名的最后一段，泛型参数部分保持原样
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}
