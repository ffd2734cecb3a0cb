//! 拦截器选择
//!
//! 针对一个类型的某个方法，计算最终生效的拦截器及其顺序：
//!
//! 1. 方法级别声明全部生效（同一拦截器类型只取第一条）
//! 2. 类级别声明中，类型未被方法级别声明覆盖、也未被忽略声明排除的生效
//!    （同一类型的多条类级别声明只取第一条）
//! 3. 按优先级升序稳定排序，优先级相同时方法级别在前
//!
//! 结果按 `(类型, 方法)` 缓存，创建后不可变；声明版本变化时整表重建。

use crate::declaration::{DeclarationRef, DeclarationTable, InterceptorKind};
use crate::error::InterceptResult;
use crate::method::{MethodId, TypeKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 一个方法的选择结果
#[derive(Debug, Clone)]
pub struct Selection {
    refs: Arc<[DeclarationRef]>,
    kinds: Arc<[InterceptorKind]>,
}

impl Selection {
    fn new(table: &DeclarationTable, refs: Vec<DeclarationRef>) -> Self {
        let kinds: Vec<_> = refs.iter().map(|r| table.get(*r).kind()).collect();
        Self {
            refs: refs.into(),
            kinds: kinds.into(),
        }
    }

    /// 生效的声明（按执行顺序）
    pub fn refs(&self) -> &[DeclarationRef] {
        &self.refs
    }

    /// 生效的拦截器类型（按执行顺序）
    pub fn kinds(&self) -> &[InterceptorKind] {
        &self.kinds
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// 为空时调用方直接调用目标方法
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// 计算方法的生效声明
pub fn select_declarations(table: &DeclarationTable, method: &MethodId) -> Vec<DeclarationRef> {
    let mut selected: Vec<DeclarationRef> = Vec::new();
    let mut kinds: Vec<InterceptorKind> = Vec::new();

    for reference in table.method_refs() {
        let declaration = table.get(reference);
        if declaration.target_method() != Some(method) {
            continue;
        }
        if kinds.contains(&declaration.kind()) {
            tracing::warn!(
                component = %table.type_key(),
                method = %method,
                interceptor = %declaration.kind(),
                "Interceptor declared twice on the same method, only the first applies"
            );
            continue;
        }
        kinds.push(declaration.kind());
        selected.push(reference);
    }

    for reference in table.class_refs() {
        let kind = table.get(reference).kind();
        if kinds.contains(&kind) || table.is_ignored(method, kind) {
            continue;
        }
        kinds.push(kind);
        selected.push(reference);
    }

    // sort_by_key 是稳定排序
    selected.sort_by_key(|r| table.get(*r).priority());
    selected
}

/// 缓存的声明表及其方法选择结果
struct CachedTable {
    revision: u64,
    table: Arc<DeclarationTable>,
    selections: RwLock<HashMap<MethodId, Selection>>,
}

/// 选择引擎
///
/// 缓存每个类型冻结后的声明表，以及每个方法的选择结果。
/// 声明表带有生成时的声明版本号，版本变化后下一次取表会重新发现，
/// 旧表上的选择结果随旧表一起丢弃。
#[derive(Default)]
pub struct SelectionEngine {
    tables: RwLock<HashMap<TypeKey, Arc<CachedTable>>>,
}

impl SelectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取类型在 `revision` 版本下的声明表，缓存缺失或过期时调用 `discover` 生成
    pub fn table<F>(
        &self,
        type_key: TypeKey,
        revision: u64,
        discover: F,
    ) -> InterceptResult<Arc<DeclarationTable>>
    where
        F: FnOnce() -> InterceptResult<DeclarationTable>,
    {
        if let Some(cached) = self.tables.read().get(&type_key) {
            if cached.revision == revision {
                return Ok(cached.table.clone());
            }
        }

        let cached = Arc::new(CachedTable {
            revision,
            table: Arc::new(discover()?),
            selections: RwLock::new(HashMap::new()),
        });
        let mut tables = self.tables.write();
        // 并发发现时保留先写入的同版本结果，更新的版本不被覆盖
        if let Some(existing) = tables.get(&type_key) {
            if existing.revision == revision {
                return Ok(existing.table.clone());
            }
            if existing.revision > revision {
                return Ok(cached.table.clone());
            }
        }
        tracing::trace!(component = %type_key, revision, "Cached declaration table");
        let table = cached.table.clone();
        tables.insert(type_key, cached);
        Ok(table)
    }

    /// 选择方法的拦截器
    ///
    /// 只有当前缓存中的声明表会记住选择结果，过期的表每次重新计算。
    pub fn select(&self, table: &Arc<DeclarationTable>, method: &MethodId) -> Selection {
        let cached = self
            .tables
            .read()
            .get(&table.type_key())
            .filter(|cached| Arc::ptr_eq(&cached.table, table))
            .cloned();

        if let Some(selection) = cached
            .as_ref()
            .and_then(|cached| cached.selections.read().get(method).cloned())
        {
            return selection;
        }

        let selection = Selection::new(table, select_declarations(table, method));
        tracing::trace!(
            component = %table.type_key(),
            method = %method,
            interceptors = ?selection.kinds(),
            "Selected interceptors"
        );
        match cached {
            Some(cached) => cached
                .selections
                .write()
                .entry(method.clone())
                .or_insert(selection)
                .clone(),
            None => selection,
        }
    }

    /// 丢弃类型的缓存
    pub fn invalidate(&self, type_key: &TypeKey) {
        self.tables.write().remove(type_key);
    }

    /// 已缓存声明表的类型数量
    pub fn cached_types(&self) -> usize {
        self.tables.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::{ConfigKey, IgnoreDeclaration, InterceptionDeclaration};

    struct OrderService;
    struct Audit;
    struct Retry;
    struct Cache;

    const PLACE: MethodId = MethodId::new("place", "(u32)->anyhow::Result<u64>");
    const CANCEL: MethodId = MethodId::new("cancel", "(u64)->anyhow::Result<()>");

    fn class<K: 'static>(priority: i32) -> InterceptionDeclaration {
        InterceptionDeclaration::class(InterceptorKind::of::<K>(), Some(priority), ConfigKey::empty())
    }

    fn method<K: 'static>(method: MethodId, priority: i32) -> InterceptionDeclaration {
        InterceptionDeclaration::method(method, InterceptorKind::of::<K>(), Some(priority), ConfigKey::empty())
    }

    fn table(
        class: Vec<InterceptionDeclaration>,
        method: Vec<InterceptionDeclaration>,
        ignore: Vec<IgnoreDeclaration>,
    ) -> DeclarationTable {
        DeclarationTable::new(TypeKey::of::<OrderService>(), class, method, ignore)
    }

    fn kinds(table: &DeclarationTable, method: &MethodId) -> Vec<InterceptorKind> {
        select_declarations(table, method)
            .into_iter()
            .map(|r| table.get(r).kind())
            .collect()
    }

    #[test]
    fn test_method_declaration_overrides_class_declaration() {
        let table = table(vec![class::<Audit>(1)], vec![method::<Audit>(PLACE, 4)], Vec::new());

        let refs = select_declarations(&table, &PLACE);

        assert_eq!(refs.len(), 1);
        assert_eq!(table.get(refs[0]).target_method(), Some(&PLACE));
        assert_eq!(table.get(refs[0]).priority(), 4);
        // 其他方法仍然使用类级别声明
        let refs = select_declarations(&table, &CANCEL);
        assert_eq!(table.get(refs[0]).target_method(), None);
    }

    #[test]
    fn test_ignore_excludes_only_that_method() {
        let table = table(
            vec![class::<Audit>(1)],
            Vec::new(),
            vec![IgnoreDeclaration::new(PLACE, InterceptorKind::of::<Audit>())],
        );

        assert!(kinds(&table, &PLACE).is_empty());
        assert_eq!(kinds(&table, &CANCEL), vec![InterceptorKind::of::<Audit>()]);
    }

    #[test]
    fn test_ignore_does_not_affect_method_declarations() {
        let table = table(
            Vec::new(),
            vec![method::<Audit>(PLACE, 1)],
            vec![IgnoreDeclaration::new(PLACE, InterceptorKind::of::<Audit>())],
        );

        assert_eq!(kinds(&table, &PLACE), vec![InterceptorKind::of::<Audit>()]);
    }

    #[test]
    fn test_priority_ordering() {
        let table = table(
            vec![class::<Audit>(5), class::<Retry>(1), class::<Cache>(3)],
            Vec::new(),
            Vec::new(),
        );

        let priorities: Vec<_> = select_declarations(&table, &PLACE)
            .into_iter()
            .map(|r| table.get(r).priority())
            .collect();
        assert_eq!(priorities, vec![1, 3, 5]);
    }

    #[test]
    fn test_ties_put_method_declarations_first() {
        let table = table(vec![class::<Audit>(2)], vec![method::<Retry>(PLACE, 2)], Vec::new());

        assert_eq!(
            kinds(&table, &PLACE),
            vec![InterceptorKind::of::<Retry>(), InterceptorKind::of::<Audit>()]
        );
    }

    #[test]
    fn test_first_class_declaration_of_a_kind_wins() {
        let table = table(
            vec![
                InterceptionDeclaration::class(
                    InterceptorKind::of::<Retry>(),
                    Some(3),
                    ConfigKey::empty().with(3),
                ),
                InterceptionDeclaration::class(
                    InterceptorKind::of::<Retry>(),
                    Some(1),
                    ConfigKey::empty().with(5),
                ),
            ],
            Vec::new(),
            Vec::new(),
        );

        let refs = select_declarations(&table, &PLACE);
        assert_eq!(refs.len(), 1);
        assert_eq!(table.get(refs[0]).config_key().int(0), Some(3));
    }

    #[test]
    fn test_duplicate_method_declarations_of_a_kind() {
        let table = table(
            Vec::new(),
            vec![method::<Audit>(PLACE, 2), method::<Audit>(PLACE, 1)],
            Vec::new(),
        );

        let refs = select_declarations(&table, &PLACE);
        assert_eq!(refs.len(), 1);
        assert_eq!(table.get(refs[0]).priority(), 2);
    }

    #[test]
    fn test_no_declarations_yield_empty_selection() {
        let table = Arc::new(table(Vec::new(), vec![method::<Audit>(PLACE, 1)], Vec::new()));
        let engine = SelectionEngine::new();

        assert!(engine.select(&table, &CANCEL).is_empty());
    }

    #[test]
    fn test_engine_memoizes() {
        let engine = SelectionEngine::new();
        let ty = TypeKey::of::<OrderService>();
        let mut discovered = 0;

        let first = engine
            .table(ty, 0, || {
                discovered += 1;
                Ok(table(vec![class::<Audit>(1)], Vec::new(), Vec::new()))
            })
            .unwrap();
        let second = engine
            .table(ty, 0, || {
                discovered += 1;
                Ok(table(Vec::new(), Vec::new(), Vec::new()))
            })
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(discovered, 1);

        let a = engine.select(&first, &PLACE);
        let b = engine.select(&first, &PLACE);
        assert!(Arc::ptr_eq(&a.refs, &b.refs));
        assert_eq!(a.kinds(), &[InterceptorKind::of::<Audit>()]);

        engine.invalidate(&ty);
        assert_eq!(engine.cached_types(), 0);
    }

    #[test]
    fn test_new_revision_rebuilds_table_and_selections() {
        let engine = SelectionEngine::new();
        let ty = TypeKey::of::<OrderService>();

        let old = engine
            .table(ty, 1, || Ok(table(vec![class::<Audit>(1)], Vec::new(), Vec::new())))
            .unwrap();
        assert_eq!(engine.select(&old, &PLACE).kinds(), &[InterceptorKind::of::<Audit>()]);

        let new = engine
            .table(ty, 2, || {
                Ok(table(vec![class::<Audit>(1), class::<Retry>(2)], Vec::new(), Vec::new()))
            })
            .unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(
            engine.select(&new, &PLACE).kinds(),
            &[InterceptorKind::of::<Audit>(), InterceptorKind::of::<Retry>()]
        );

        // 较旧版本的发现结果不会替换缓存
        let stale = engine
            .table(ty, 1, || Ok(table(Vec::new(), Vec::new(), Vec::new())))
            .unwrap();
        assert!(engine.select(&stale, &PLACE).is_empty());
        let current = engine.table(ty, 2, || unreachable!()).unwrap();
        assert!(Arc::ptr_eq(&current, &new));
        assert_eq!(engine.select(&current, &PLACE).len(), 2);
        assert_eq!(engine.cached_types(), 1);
    }
}
