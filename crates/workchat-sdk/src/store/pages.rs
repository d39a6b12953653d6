//! 分页集合 - 单个作用域下的游标分页缓存
//!
//! 页序列按拉取方向追加（越靠后越旧），第一页是最新页。
//! 实时推送的新条目永远插入第一页头部，不触发重新分页。

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::store::entities::Page;

/// 可缓存实体 - 以字符串身份去重
pub trait CacheEntity: Clone {
    fn identity(&self) -> &str;
}

/// 乐观消息确认时的身份替换结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// 原地替换成功（临时ID → 服务端ID）
    Swapped,
    /// 服务端ID已存在（实时回声先到），临时条目被移除
    RemovedDuplicate,
    /// 临时条目不存在
    NotFound,
}

/// 单作用域的分页集合
///
/// 版本号在每次变更时递增；flatten 结果按版本缓存，
/// 底层页未变化时重复调用返回同一个 `Arc`（引用稳定）。
pub struct PagedCollection<T> {
    pages: Vec<Page<T>>,
    version: u64,
    flat_cache: Mutex<Option<(u64, Arc<Vec<T>>)>>,
}

impl<T: CacheEntity> PagedCollection<T> {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            version: 0,
            flat_cache: Mutex::new(None),
        }
    }

    pub fn pages(&self) -> &[Page<T>] {
        &self.pages
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// 是否还有更旧的数据可拉取
    pub fn has_more(&self) -> bool {
        self.pages.last().map(|p| p.has_more).unwrap_or(true)
    }

    /// 下一次（更旧方向）拉取使用的游标
    pub fn next_cursor(&self) -> Option<String> {
        self.pages.last().and_then(|p| p.next_cursor.clone())
    }

    /// 追加一页更旧的数据
    pub fn append_older(&mut self, page: Page<T>) {
        self.pages.push(page);
        self.bump();
    }

    /// 整体替换（全量刷新）
    pub fn replace_all(&mut self, pages: Vec<Page<T>>) {
        self.pages = pages;
        self.bump();
    }

    /// 把一个新条目插入最新页头部
    ///
    /// 作用域还没有任何页时先播种一个首页：`has_more = true`、
    /// 无游标，该作用域的首次全量拉取会 `replace_all` 覆盖它。
    pub fn push_newest(&mut self, item: T) {
        match self.pages.first_mut() {
            Some(page) => page.items.insert(0, item),
            None => self.pages.push(Page::new(vec![item], true, None)),
        }
        self.bump();
    }

    /// 按身份检查条目是否已缓存（跨所有页）
    pub fn contains(&self, identity: &str) -> bool {
        self.pages
            .iter()
            .any(|page| page.items.iter().any(|item| item.identity() == identity))
    }

    /// 按身份更新条目，返回是否命中
    pub fn update_item<F>(&mut self, identity: &str, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        for page in &mut self.pages {
            if let Some(item) = page.items.iter_mut().find(|i| i.identity() == identity) {
                f(item);
                self.bump();
                return true;
            }
        }
        false
    }

    /// 按身份移除条目，返回是否命中
    pub fn remove_item(&mut self, identity: &str) -> bool {
        for page in &mut self.pages {
            if let Some(pos) = page.items.iter().position(|i| i.identity() == identity) {
                page.items.remove(pos);
                self.bump();
                return true;
            }
        }
        false
    }

    /// 用服务端确认实体原子替换本地乐观条目
    ///
    /// 替换发生在持锁的同步片段内，flatten 的消费方不可能同时
    /// 观察到两个条目或一个空洞。服务端ID已存在（回声先到）时
    /// 移除临时条目而不是再插入一次。
    pub fn replace_item(&mut self, old_identity: &str, new_item: T) -> ReplaceOutcome {
        if new_item.identity() != old_identity && self.contains(new_item.identity()) {
            return if self.remove_item(old_identity) {
                ReplaceOutcome::RemovedDuplicate
            } else {
                ReplaceOutcome::NotFound
            };
        }
        for page in &mut self.pages {
            if let Some(pos) = page.items.iter().position(|i| i.identity() == old_identity) {
                page.items[pos] = new_item;
                self.bump();
                return ReplaceOutcome::Swapped;
            }
        }
        ReplaceOutcome::NotFound
    }

    /// 展平为规范显示顺序
    ///
    /// 先按拉取顺序拼接并按身份去重（保留先出现者），再交给
    /// `order` 排出显示顺序。纯投影：页未变化时返回缓存的 `Arc`。
    pub fn flatten_with<F>(&self, order: F) -> Arc<Vec<T>>
    where
        F: FnOnce(Vec<T>) -> Vec<T>,
    {
        let mut cache = self.flat_cache.lock();
        if let Some((version, flat)) = cache.as_ref() {
            if *version == self.version {
                return Arc::clone(flat);
            }
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut items = Vec::new();
        for page in &self.pages {
            for item in &page.items {
                if seen.insert(item.identity().to_string()) {
                    items.push(item.clone());
                }
            }
        }

        let flat = Arc::new(order(items));
        *cache = Some((self.version, Arc::clone(&flat)));
        flat
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}

impl<T: CacheEntity> Default for PagedCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}
