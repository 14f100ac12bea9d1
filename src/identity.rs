// 该文件是 Shanan （山南西风） 项目的一部分。
// src/identity.rs - 序列对象编号
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 序列传播中，服务端以整数 `obj_id` 区分对象；这里维护整数与分类之间的双向映射。

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::iter::Peekable;
use std::str::Chars;

use tracing::debug;

use crate::scene::{Annotation, Classification};

pub const SYNTHETIC_PREFIX: &str = "SAM";

/// 最小的未被占用的 `SAM{n}`
pub fn next_class_name(used: &HashSet<String>) -> String {
  let mut i = 0usize;
  loop {
    let name = format!("{SYNTHETIC_PREFIX}{i}");
    if !used.contains(&name) {
      return name;
    }
    i += 1;
  }
}

/// 数字按数值比较的自然序
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
  let mut a = a.chars().peekable();
  let mut b = b.chars().peekable();
  loop {
    match (a.peek().copied(), b.peek().copied()) {
      (None, None) => return Ordering::Equal,
      (None, Some(_)) => return Ordering::Less,
      (Some(_), None) => return Ordering::Greater,
      (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
        let (da, db) = (take_digits(&mut a), take_digits(&mut b));
        let (ta, tb) = (da.trim_start_matches('0'), db.trim_start_matches('0'));
        let ord = ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb));
        if ord != Ordering::Equal {
          return ord;
        }
      }
      (Some(x), Some(y)) => {
        if x != y {
          return x.cmp(&y);
        }
        a.next();
        b.next();
      }
    }
  }
}

fn take_digits(it: &mut Peekable<Chars<'_>>) -> String {
  let mut digits = String::new();
  while let Some(c) = it.peek().copied().filter(char::is_ascii_digit) {
    digits.push(c);
    it.next();
  }
  digits
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityMap {
  index_to_class: BTreeMap<i32, Classification>,
  class_to_index: HashMap<Classification, i32>,
  synthetic: Vec<Classification>,
}

impl IdentityMap {
  /// 为顶层提示对象分配编号。
  ///
  /// 对象先按编号排序，保证同一组对象得到同样的映射。未分类对象以其位置为编号，
  /// 并获得一个新的 `SAM{n}` 分类；已分类对象的编号从对象数开始，同分类共用一个编号。
  /// `existing` 是场景中已有的全部标注，用于避开已占用的名称。
  pub fn assign<'a>(
    objects: &'a [Annotation],
    existing: &[Annotation],
  ) -> (IdentityMap, Vec<(i32, &'a Annotation)>) {
    let mut used: HashSet<String> = existing
      .iter()
      .filter_map(|o| o.classification.as_ref())
      .map(|c| c.name().to_string())
      .filter(|name| name.starts_with(SYNTHETIC_PREFIX))
      .collect();

    let mut ordered: Vec<&Annotation> = objects.iter().collect();
    ordered.sort_by_key(|o| o.id);

    let mut map = IdentityMap::default();
    let mut assigned = Vec::with_capacity(ordered.len());
    let total = ordered.len() as i32;
    for (i, object) in ordered.into_iter().enumerate() {
      let index = match &object.classification {
        None => {
          let class = Classification::new(next_class_name(&used));
          used.insert(class.name().to_string());
          map.index_to_class.insert(i as i32, class.clone());
          map.synthetic.push(class);
          i as i32
        }
        Some(class) => {
          let next = total + map.class_to_index.len() as i32;
          let index = *map.class_to_index.entry(class.clone()).or_insert(next);
          map.index_to_class.insert(index, class.clone());
          index
        }
      };
      debug!("对象 {} 编号为 {}", object.id, index);
      assigned.push((index, object));
    }
    (map, assigned)
  }

  pub fn classification(&self, index: i32) -> Option<&Classification> {
    self.index_to_class.get(&index)
  }

  /// 解析服务端返回的 `object_idx`（整数或形如 `"3.0"` 的字符串）
  pub fn resolve(&self, raw: &str) -> Option<Classification> {
    let index = raw
      .trim()
      .parse::<i32>()
      .ok()
      .or_else(|| raw.trim().parse::<f64>().ok().map(|f| f as i32))?;
    self.classification(index).cloned()
  }

  /// 本次新建的分类，按自然序排列
  pub fn synthetic(&self) -> Vec<Classification> {
    let mut classes = self.synthetic.clone();
    classes.sort_by(|a, b| natural_cmp(a.name(), b.name()));
    classes
  }

  pub fn len(&self) -> usize {
    self.index_to_class.len()
  }

  pub fn is_empty(&self) -> bool {
    self.index_to_class.is_empty()
  }
}
