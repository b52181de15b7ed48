use serde::{Deserialize, Serialize};

/// One page of a listing. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    /// Cut page `page` out of `all`, which is already in listing order.
    /// Page 0 is treated as page 1 and page size 0 as 1.
    pub fn slice(all: Vec<T>, page: u32, page_size: u32) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total_count = all.len() as u64;
        let offset = (page as usize - 1).saturating_mul(page_size as usize);
        let items = all
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();
        Self {
            items,
            total_count,
            page,
            page_size,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page: self.page,
            page_size: self.page_size,
        }
    }
}
