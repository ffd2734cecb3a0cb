//! 组件激活钩子
//!
//! 容器在组件完成初始化后调用后置处理器，拦截处理器在这里把组件包装成代理。

use crate::error::InterceptResult;
use crate::proxy::ProxiedComponent;
use crate::weaver::{global_weaver, Weaver};
use std::any::Any;
use std::sync::Arc;

/// 组件后置处理器
///
/// 容器侧的扩展点：组件初始化前后各调用一次，可以返回原始组件或包装后的组件。
pub trait ComponentPostProcessor: Send + Sync {
    /// 在组件初始化回调之前调用
    fn post_process_before_initialization(
        &self,
        component: Arc<dyn Any + Send + Sync>,
        _component_name: &str,
    ) -> InterceptResult<Arc<dyn Any + Send + Sync>> {
        Ok(component)
    }

    /// 在组件初始化回调之后调用
    fn post_process_after_initialization(
        &self,
        component: Arc<dyn Any + Send + Sync>,
        _component_name: &str,
    ) -> InterceptResult<Arc<dyn Any + Send + Sync>> {
        Ok(component)
    }

    /// 处理器名称（用于日志）
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// 执行顺序，数值越小越先执行
    fn order(&self) -> i32 {
        0
    }
}

/// 拦截后置处理器
///
/// 已登记的组件被包装为 [`ProxiedComponent`] 返回，容器按能力接口取用：
///
/// ```ignore
/// let processor = InterceptionPostProcessor::new(weaver.clone());
/// let component = processor.post_process_after_initialization(Arc::new(OrderService::default()), "orderService")?;
/// let orders = component
///     .downcast::<ProxiedComponent>()
///     .ok()
///     .and_then(|proxied| proxied.get::<dyn OrderApi>());
/// ```
///
/// 未登记的组件原样返回。
pub struct InterceptionPostProcessor {
    weaver: Arc<Weaver>,
    enabled: bool,
}

impl InterceptionPostProcessor {
    pub fn new(weaver: Arc<Weaver>) -> Self {
        Self {
            weaver,
            enabled: true,
        }
    }

    /// 使用全局 Weaver
    pub fn global() -> Self {
        Self::new(global_weaver())
    }

    /// 不做任何包装的处理器
    pub fn disabled(weaver: Arc<Weaver>) -> Self {
        Self {
            weaver,
            enabled: false,
        }
    }

    pub fn weaver(&self) -> &Arc<Weaver> {
        &self.weaver
    }

    fn should_wrap(&self, component: &(dyn Any + Send + Sync)) -> bool {
        self.enabled && self.weaver.is_registered(component.type_id())
    }
}

impl ComponentPostProcessor for InterceptionPostProcessor {
    fn name(&self) -> &str {
        "InterceptionPostProcessor"
    }

    fn order(&self) -> i32 {
        // 在其他处理器之后执行，包装的是完全初始化的组件
        2000
    }

    fn post_process_after_initialization(
        &self,
        component: Arc<dyn Any + Send + Sync>,
        component_name: &str,
    ) -> InterceptResult<Arc<dyn Any + Send + Sync>> {
        if component.is::<ProxiedComponent>() || !self.should_wrap(&*component) {
            tracing::trace!("Component '{}' is not eligible for interception", component_name);
            return Ok(component);
        }

        let proxied = self.weaver.build_proxy_erased(component)?;
        tracing::debug!(
            component = component_name,
            intercepted = proxied.is_intercepted(),
            "Component activated through interception"
        );
        Ok(Arc::new(proxied))
    }
}
