use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weave::prelude::*;
use weave::InterceptorRegistration;

// ==================== 能力接口 ====================

#[interceptable]
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn place(&self, sku: String, quantity: u32) -> anyhow::Result<u64>;
    async fn ship(&self, order_id: u64) -> anyhow::Result<String>;
    fn cancel(&self, order_id: u64) -> anyhow::Result<bool>;
}

#[interceptable]
pub trait StockApi: Send + Sync {
    fn available(&self, sku: String) -> anyhow::Result<u32>;
}

// ==================== 自定义拦截器 ====================

/// 审计拦截器：记录调用者可见的业务操作
#[derive(Default)]
struct AuditInterceptor {
    category: String,
}

#[async_trait]
impl Interceptor for AuditInterceptor {
    fn name(&self) -> &str {
        "AuditInterceptor"
    }

    fn initialize(&mut self, context: &InitContext<'_>) -> anyhow::Result<()> {
        self.category = context.config_key().str(0).unwrap_or("general").to_string();
        Ok(())
    }

    async fn intercept(&self, invocation: Invocation) -> InvocationResult {
        let result = invocation.proceed().await;
        tracing::info!(
            category = %self.category,
            method = invocation.method().name(),
            success = result.is_ok(),
            "Audit record"
        );
        result
    }
}

impl InterceptorType for AuditInterceptor {
    const DEFAULT_PRIORITY: i32 = 5;

    fn create() -> anyhow::Result<Self> {
        Ok(Self::default())
    }
}

weave::inventory::submit! { InterceptorRegistration::of::<AuditInterceptor>() }

// ==================== 业务组件 ====================

/// 订单服务：仓库接口偶尔超时，下单由重试兜底
struct OrderService {
    next_id: AtomicU64,
    warehouse_timeouts: AtomicU32,
    stock: parking_lot::Mutex<HashMap<String, u32>>,
}

impl OrderService {
    fn new() -> Self {
        let stock = HashMap::from([("WIDGET".to_string(), 10), ("GADGET".to_string(), 2)]);
        Self {
            next_id: AtomicU64::new(1000),
            warehouse_timeouts: AtomicU32::new(1),
            stock: parking_lot::Mutex::new(stock),
        }
    }
}

#[intercepted]
#[intercept(LoggingInterceptor, config(true))]
#[intercept(AuditInterceptor, config("orders"))]
#[async_trait]
impl OrderApi for OrderService {
    #[intercept(RetryInterceptor, config(3, 50))]
    async fn place(&self, sku: String, quantity: u32) -> anyhow::Result<u64> {
        if self.warehouse_timeouts.load(Ordering::SeqCst) > 0 {
            self.warehouse_timeouts.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("warehouse timed out");
        }

        let mut stock = self.stock.lock();
        let available = stock.get_mut(&sku).ok_or_else(|| anyhow::anyhow!("unknown sku {}", sku))?;
        if *available < quantity {
            anyhow::bail!("only {} {} left", available, sku);
        }
        *available -= quantity;
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    #[intercept(TimingInterceptor, config(20))]
    async fn ship(&self, order_id: u64) -> anyhow::Result<String> {
        tokio::time::sleep(Duration::from_millis(40)).await;
        Ok(format!("TRACK-{}", order_id))
    }

    #[ignore_interception(AuditInterceptor)]
    fn cancel(&self, order_id: u64) -> anyhow::Result<bool> {
        Ok(order_id >= 1000)
    }
}

#[intercepted]
impl StockApi for OrderService {
    fn available(&self, sku: String) -> anyhow::Result<u32> {
        Ok(self.stock.lock().get(&sku).copied().unwrap_or(0))
    }
}

fn load_config() -> anyhow::Result<WeaveConfig> {
    let config_paths = ["demos/weave-demo/weave.toml", "weave.toml"];
    let config = match config_paths.iter().find(|path| std::path::Path::new(path).exists()) {
        Some(path) => WeaveConfig::from_file(path)?,
        None => WeaveConfig::default(),
    };
    Ok(config.apply_env())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    config.logging.clone().init()?;

    println!("\n╔════════════════════════════════════════════════════╗");
    println!("║        Weave - Declarative Interception Demo       ║");
    println!("╚════════════════════════════════════════════════════╝\n");

    // 容器在组件初始化后调用后置处理器，拿到包装后的组件
    let weaver = Arc::new(Weaver::builder().config(config).build());
    let processor = InterceptionPostProcessor::new(weaver.clone());
    let component: Arc<dyn Any + Send + Sync> = Arc::new(OrderService::new());
    let component = processor
        .post_process_after_initialization(component, "orderService")?
        .downcast::<ProxiedComponent>()
        .map_err(|_| anyhow::anyhow!("orderService was not proxied"))?;

    println!("📦 Component exposes: {:?}", component.interface_names());
    println!("   Intercepted: {}\n", component.is_intercepted());

    let component_type = TypeKey::of::<OrderService>();
    for method in [<dyn OrderApi>::PLACE, <dyn OrderApi>::SHIP, <dyn OrderApi>::CANCEL] {
        let chain: Vec<String> = weaver
            .select(&component_type, &method)?
            .iter()
            .map(|kind| kind.short_name().to_string())
            .collect();
        println!("🔗 {} -> {:?}", method, chain);
    }
    println!();

    let orders = component.require::<dyn OrderApi>()?;
    let stock = component.require::<dyn StockApi>()?;

    // 第一次仓库超时，由重试拦截器恢复
    let order_id = orders.place("WIDGET".to_string(), 3).await?;
    println!("✅ Placed order {}", order_id);

    let tracking = orders.ship(order_id).await?;
    println!("🚚 Shipped with {}", tracking);

    match orders.place("GADGET".to_string(), 5).await {
        Ok(id) => println!("✅ Placed order {}", id),
        Err(e) => println!("❌ Order rejected: {}", e),
    }

    println!("↩️  Cancelled: {}", orders.cancel(order_id)?);
    println!("📊 WIDGET left: {}", stock.available("WIDGET".to_string())?);

    println!("\n╔════════════════════════════════════════════════════╗");
    println!("║                    Demo Finished                   ║");
    println!("╚════════════════════════════════════════════════════╝");
    Ok(())
}
