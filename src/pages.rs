// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 分页计算模块
//!
//! `Pages` 描述一次分页查询的状态：元素总数、每页元素数与当前页码（从 1 开始）。
//! 总页数、首末页判断、前后页码以及分页条窗口都按需计算，不额外存储。
//!
//! 典型用法：处理函数以调用方默认值构造 `Pages`，调用
//! [`Pages::pagination_params`] 合并请求中的 `limit` / `page` 参数，
//! 再用 [`Pages::paginate`] 从集合中截取当前页，最后随 `TemplateData` 交给模板。
//!
//! `Pages` 同时实现了 minijinja 的 `Object`，模板中可以直接读取字段并调用
//! `pages.has_next()`、`pages.page_range(5)` 等方法。

use std::sync::Arc;

use minijinja::value::{from_args, Enumerator, Object, Value};
use minijinja::{Error, ErrorKind, State};
use serde_derive::{Deserialize, Serialize};

use crate::{exception::Exception, param::DEFAULT_ELEMENTS_PER_PAGE, request::Request};

/// 分页状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pages {
    /// 参与分页的元素总数
    pub total_elements: i64,
    /// 每页显示的元素数
    pub elements_per_page: i64,
    /// 当前页码（从 1 开始）
    pub actual_page: i64,
}

/// 分页条中的一个页码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 页码
    pub number: i64,
    /// 是否为当前页
    pub active: bool,
}

impl Page {
    pub fn number_of_page(&self) -> i64 {
        self.number
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Pages {
    pub fn new(total_elements: i64, elements_per_page: i64, actual_page: i64) -> Self {
        Self {
            total_elements,
            elements_per_page,
            actual_page,
        }
    }

    /// 从请求参数中读取 `limit` 与 `page`，与当前值合并。
    ///
    /// - `limit` 为空：沿用当前的 `elements_per_page`（非零时），否则取 20；
    /// - `page` 为空或为 `"0"`：沿用当前的 `actual_page`（非零时），否则取 1；
    /// - 无法解析的数字按 0 处理；解析后的 `limit` 不是正数时同样回退到默认页大小。
    pub fn pagination_params(&mut self, request: &Request) {
        let limit = request.form_value("limit").unwrap_or_default();
        let page = request.form_value("page").unwrap_or_default();
        self.apply_params(limit, page);
    }

    fn apply_params(&mut self, limit: &str, page: &str) {
        let limit = if limit.is_empty() {
            self.fallback_limit()
        } else {
            parse_int(limit)
        };
        let limit = if limit > 0 { limit } else { self.fallback_limit() };

        let page = if page.is_empty() || page == "0" {
            if self.actual_page != 0 {
                self.actual_page
            } else {
                1
            }
        } else {
            parse_int(page)
        };

        // 偏移量换算回页码，limit > 0 时结果与 page 相同
        let current_page = page
            .checked_sub(1)
            .and_then(|p| p.checked_mul(limit))
            .map(|offset| offset / limit + 1)
            .unwrap_or(page);

        self.elements_per_page = limit;
        self.actual_page = current_page;
    }

    fn fallback_limit(&self) -> i64 {
        if self.elements_per_page > 0 {
            self.elements_per_page
        } else {
            DEFAULT_ELEMENTS_PER_PAGE
        }
    }

    /// 截取当前页对应的子切片。
    ///
    /// 当前页会被限制在 `[1, total_pages()]` 之间；选取范围为
    /// `[(page-1)*per_page, min(page*per_page, total_elements))`。
    /// 集合实际长度不足以覆盖该范围时返回 [`Exception::PageOutOfBounds`]，不做截断。
    pub fn paginate<'a, T>(&self, elements: &'a [T]) -> Result<&'a [T], Exception> {
        if self.elements_per_page <= 0 {
            return Err(Exception::InvalidPageSize(self.elements_per_page));
        }
        let total_pages = self.total_pages();
        if total_pages == 0 {
            return Ok(&elements[..0]);
        }

        let page = self.actual_page.clamp(1, total_pages);
        let start = (page - 1) * self.elements_per_page;
        let end = start
            .saturating_add(self.elements_per_page)
            .min(self.total_elements);

        let (start, end) = (start as usize, end as usize);
        if end > elements.len() {
            return Err(Exception::PageOutOfBounds {
                start,
                end,
                len: elements.len(),
            });
        }
        Ok(&elements[start..end])
    }

    pub fn current_page(&self) -> i64 {
        self.actual_page
    }

    /// 总页数（向上取整）；每页元素数不是正数时为 0
    pub fn total_pages(&self) -> i64 {
        if self.elements_per_page <= 0 {
            return 0;
        }
        let total = self.total_elements.max(0);
        total / self.elements_per_page + i64::from(total % self.elements_per_page != 0)
    }

    pub fn is_first(&self) -> bool {
        self.actual_page == 1
    }

    pub fn is_last(&self) -> bool {
        self.actual_page == self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.actual_page > 1
    }

    pub fn has_next(&self) -> bool {
        self.actual_page < self.total_pages()
    }

    pub fn previous(&self) -> i64 {
        if self.actual_page > self.total_pages() {
            return self.total_pages();
        }
        self.actual_page.saturating_sub(1)
    }

    pub fn next(&self) -> i64 {
        if self.actual_page < 1 {
            return 1;
        }
        self.actual_page.saturating_add(1)
    }

    /// 将任意页码限制在 `[1, total_pages()]` 之间
    pub fn go_to_page(&self, page: i64) -> i64 {
        if page < 1 {
            1
        } else if page > self.total_pages() {
            self.total_pages()
        } else {
            page
        }
    }

    pub fn first(&self) -> i64 {
        self.go_to_page(1)
    }

    pub fn last(&self) -> i64 {
        self.go_to_page(self.total_pages())
    }

    /// 以当前页为中心生成宽度为 `max_pages_to_show` 的分页条窗口。
    ///
    /// 窗口越过任一边界时整体平移而不是收缩；总页数不足时窗口覆盖全部页码。
    pub fn page_range(&self, max_pages_to_show: i64) -> Vec<Page> {
        let total_pages = self.total_pages();
        let half = max_pages_to_show / 2;

        // 页码来自查询参数，可能是任意 i64
        let mut start_page = self.actual_page.saturating_sub(half);
        let mut end_page = self.actual_page.saturating_add(half);

        if start_page < 1 {
            start_page = 1;
            end_page = max_pages_to_show;
        }

        if end_page > total_pages {
            end_page = total_pages;
            start_page = total_pages
                .saturating_sub(max_pages_to_show)
                .saturating_add(1)
                .max(1);
        }

        (start_page..=end_page)
            .map(|number| Page {
                number,
                active: number == self.actual_page,
            })
            .collect()
    }
}

// 宽松的整数解析：失败时为 0
fn parse_int(value: &str) -> i64 {
    value.trim().parse().unwrap_or(0)
}

impl Object for Pages {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "total_elements" => Some(Value::from(self.total_elements)),
            "elements_per_page" => Some(Value::from(self.elements_per_page)),
            "actual_page" => Some(Value::from(self.actual_page)),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&["total_elements", "elements_per_page", "actual_page"])
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        let value = match method {
            "current_page" => Value::from(self.current_page()),
            "total_pages" => Value::from(self.total_pages()),
            "is_first" => Value::from(self.is_first()),
            "is_last" => Value::from(self.is_last()),
            "has_previous" => Value::from(self.has_previous()),
            "has_next" => Value::from(self.has_next()),
            "previous" => Value::from(self.previous()),
            "next" => Value::from(self.next()),
            "first" => Value::from(self.first()),
            "last" => Value::from(self.last()),
            "go_to_page" => {
                let (page,): (i64,) = from_args(args)?;
                Value::from(self.go_to_page(page))
            }
            "page_range" => {
                let (max,): (i64,) = from_args(args)?;
                Value::from_serialize(self.page_range(max))
            }
            _ => {
                return Err(Error::new(
                    ErrorKind::UnknownMethod,
                    format!("Pages has no method named {}", method),
                ))
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::{context, Environment};
    use proptest::prelude::*;

    fn request(target: &str) -> Request {
        let raw = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target);
        Request::try_from(raw.as_bytes(), 0).unwrap()
    }

    fn numbers(range: &[Page]) -> Vec<i64> {
        range.iter().map(|p| p.number).collect()
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(Pages::new(50, 10, 1).total_pages(), 5);
        assert_eq!(Pages::new(45, 10, 1).total_pages(), 5);
        assert_eq!(Pages::new(0, 10, 1).total_pages(), 0);
        assert_eq!(Pages::new(1, 10, 1).total_pages(), 1);
    }

    #[test]
    fn test_total_pages_guards_zero_page_size() {
        assert_eq!(Pages::new(50, 0, 1).total_pages(), 0);
        assert_eq!(Pages::new(50, -3, 1).total_pages(), 0);
    }

    #[test]
    fn test_paginate_clamps_high_page() {
        let elements: Vec<i32> = (0..50).collect();
        let pages = Pages::new(50, 10, 999);
        assert_eq!(pages.paginate(&elements).unwrap(), &elements[40..50]);
    }

    #[test]
    fn test_paginate_clamps_low_page() {
        let elements: Vec<i32> = (0..50).collect();
        let pages = Pages::new(50, 10, -1);
        assert_eq!(pages.paginate(&elements).unwrap(), &elements[0..10]);
    }

    #[test]
    fn test_paginate_partial_last_page() {
        let elements: Vec<i32> = (0..45).collect();
        let pages = Pages::new(45, 10, 5);
        assert_eq!(pages.paginate(&elements).unwrap(), &elements[40..45]);
    }

    #[test]
    fn test_paginate_short_collection_is_error() {
        let elements: Vec<i32> = (0..30).collect();
        let pages = Pages::new(50, 10, 4);
        match pages.paginate(&elements) {
            Err(Exception::PageOutOfBounds { start, end, len }) => {
                assert_eq!((start, end, len), (30, 40, 30));
            }
            other => panic!("Expected PageOutOfBounds, got {:?}", other),
        }
    }

    #[test]
    fn test_paginate_invalid_page_size() {
        let elements = [1, 2, 3];
        let pages = Pages::new(3, 0, 1);
        assert!(matches!(
            pages.paginate(&elements),
            Err(Exception::InvalidPageSize(0))
        ));
    }

    #[test]
    fn test_paginate_empty() {
        let elements: Vec<String> = vec![];
        let pages = Pages::new(0, 10, 3);
        assert!(pages.paginate(&elements).unwrap().is_empty());
    }

    #[test]
    fn test_pagination_params_defaults() {
        let mut pages = Pages::new(50, 0, 0);
        pages.pagination_params(&request("/items"));
        assert_eq!(pages.elements_per_page, 20);
        assert_eq!(pages.actual_page, 1);
    }

    #[test]
    fn test_pagination_params_from_query() {
        let mut pages = Pages::new(50, 0, 0);
        pages.pagination_params(&request("/items?page=2&limit=10"));
        assert_eq!(pages.elements_per_page, 10);
        assert_eq!(pages.actual_page, 2);
    }

    #[test]
    fn test_pagination_params_keeps_caller_defaults() {
        let mut pages = Pages::new(50, 5, 3);
        pages.pagination_params(&request("/items?page=0"));
        assert_eq!(pages.elements_per_page, 5);
        assert_eq!(pages.actual_page, 3);
    }

    #[test]
    fn test_pagination_params_unparsable_values() {
        // 无法解析的 page 视为 0，经偏移量换算后仍为 0，由 paginate 负责限制
        let mut pages = Pages::new(50, 0, 0);
        pages.pagination_params(&request("/items?page=abc&limit=xyz"));
        assert_eq!(pages.elements_per_page, 20);
        assert_eq!(pages.actual_page, 0);
    }

    #[test]
    fn test_pagination_params_negative_limit_falls_back() {
        let mut pages = Pages::new(50, 15, 0);
        pages.pagination_params(&request("/items?limit=-4&page=2"));
        assert_eq!(pages.elements_per_page, 15);
        assert_eq!(pages.actual_page, 2);
    }

    #[test]
    fn test_navigation() {
        let pages = Pages::new(50, 10, 1);
        assert!(pages.is_first());
        assert!(!pages.is_last());
        assert!(!pages.has_previous());
        assert!(pages.has_next());
        assert_eq!(pages.previous(), 0);
        assert_eq!(pages.next(), 2);
        assert_eq!(pages.first(), 1);
        assert_eq!(pages.last(), 5);

        let pages = Pages::new(50, 10, 5);
        assert!(pages.is_last());
        assert!(!pages.has_next());
        assert!(pages.has_previous());
    }

    #[test]
    fn test_navigation_out_of_range() {
        let beyond = Pages::new(50, 10, 9);
        assert_eq!(beyond.previous(), 5);
        let below = Pages::new(50, 10, -2);
        assert_eq!(below.next(), 1);
    }

    #[test]
    fn test_go_to_page() {
        let pages = Pages::new(50, 10, 1);
        assert_eq!(pages.go_to_page(-7), 1);
        assert_eq!(pages.go_to_page(3), 3);
        assert_eq!(pages.go_to_page(42), 5);
    }

    #[test]
    fn test_page_range_shifts_at_edges() {
        let start = Pages::new(100, 10, 1);
        assert_eq!(numbers(&start.page_range(5)), vec![1, 2, 3, 4, 5]);

        let end = Pages::new(100, 10, 10);
        assert_eq!(numbers(&end.page_range(5)), vec![6, 7, 8, 9, 10]);

        let middle = Pages::new(100, 10, 6);
        let range = middle.page_range(5);
        assert_eq!(numbers(&range), vec![4, 5, 6, 7, 8]);
        let active: Vec<i64> = range.iter().filter(|p| p.is_active()).map(|p| p.number_of_page()).collect();
        assert_eq!(active, vec![6]);
    }

    #[test]
    fn test_page_range_fewer_pages_than_window() {
        let pages = Pages::new(25, 10, 2);
        assert_eq!(numbers(&pages.page_range(5)), vec![1, 2, 3]);
        assert!(Pages::new(0, 10, 1).page_range(5).is_empty());
    }

    #[test]
    fn test_pages_in_template() {
        let mut env = Environment::new();
        env.add_template(
            "pager",
            "{{ pages.actual_page }}/{{ pages.total_pages() }}|{% for p in pages.page_range(3) %}{% if p.active %}[{{ p.number }}]{% else %}{{ p.number }}{% endif %}{% endfor %}|{{ pages.has_next() }}",
        )
        .unwrap();
        let out = env
            .get_template("pager")
            .unwrap()
            .render(context! { pages => Value::from_object(Pages::new(50, 10, 2)) })
            .unwrap();
        assert_eq!(out, "2/5|1[2]3|true");
    }

    #[test]
    fn test_extreme_page_params_do_not_overflow() {
        let mut high = Pages::new(100, 10, 1);
        high.pagination_params(&request("/items?page=9223372036854775807"));
        assert_eq!(high.current_page(), i64::MAX);
        assert_eq!(numbers(&high.page_range(5)), vec![6, 7, 8, 9, 10]);
        assert_eq!(high.next(), i64::MAX);
        assert_eq!(high.previous(), 10);
        assert!(!high.has_next());

        let mut low = Pages::new(100, 10, 1);
        low.pagination_params(&request("/items?page=-9223372036854775808"));
        assert_eq!(low.current_page(), i64::MIN);
        assert_eq!(numbers(&low.page_range(5)), vec![1, 2, 3, 4, 5]);
        assert_eq!(low.previous(), i64::MIN);
        assert_eq!(low.next(), 1);
        assert!(!low.has_previous());
    }

    #[test]
    fn test_extreme_limit_param() {
        let elements: Vec<i32> = (0..95).collect();
        let mut pages = Pages::new(95, 10, 1);
        pages.pagination_params(&request("/items?limit=9223372036854775807&page=3"));
        assert_eq!(pages.total_pages(), 1);
        assert_eq!(pages.paginate(&elements).unwrap().len(), 95);
    }

    #[test]
    fn test_extreme_page_in_template() {
        let mut env = Environment::new();
        env.add_template(
            "pager",
            "{% for p in pages.page_range(5) %}{{ p.number }} {% endfor %}{{ pages.next() }}",
        )
        .unwrap();
        let out = env
            .get_template("pager")
            .unwrap()
            .render(context! { pages => Value::from_object(Pages::new(30, 10, i64::MAX)) })
            .unwrap();
        assert_eq!(out, format!("1 2 3 {}", i64::MAX));
    }

    proptest! {
        #[test]
        fn prop_navigation_total_for_any_page(page in any::<i64>(), limit in any::<i64>(), max in -20i64..20) {
            let mut pages = Pages::new(1_000, 10, 1);
            pages.apply_params(&limit.to_string(), &page.to_string());
            let _ = pages.previous();
            let _ = pages.next();
            for p in pages.page_range(max) {
                prop_assert!(p.number >= 1 && p.number <= pages.total_pages());
            }
        }

        #[test]
        fn prop_total_pages_is_ceiling(total in 0i64..100_000, per_page in 1i64..500) {
            let pages = Pages::new(total, per_page, 1);
            let expected = (total as f64 / per_page as f64).ceil() as i64;
            prop_assert_eq!(pages.total_pages(), expected);
        }

        #[test]
        fn prop_paginate_never_exceeds_page_size(total in 0usize..500, per_page in 1i64..50, page in -5i64..60) {
            let elements: Vec<usize> = (0..total).collect();
            let pages = Pages::new(total as i64, per_page, page);
            let slice = pages.paginate(&elements).unwrap();
            prop_assert!(slice.len() as i64 <= per_page);
            if total > 0 {
                prop_assert!(!slice.is_empty());
            }
        }

        #[test]
        fn prop_page_range_within_bounds(total in 0i64..1000, per_page in 1i64..20, page in 1i64..80, max in 1i64..12) {
            let pages = Pages::new(total, per_page, page);
            for p in pages.page_range(max) {
                prop_assert!(p.number >= 1 && p.number <= pages.total_pages());
            }
        }
    }
}
