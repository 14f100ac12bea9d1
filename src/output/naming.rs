// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/naming.rs - 结果命名与着色
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

use crate::scene::Annotation;

/// 为新建对象设置名称与颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decorations {
  pub set_names: bool,
  /// 只作用于未分类的对象
  pub random_colors: bool,
}

impl Default for Decorations {
  fn default() -> Self {
    Decorations {
      set_names: true,
      random_colors: true,
    }
  }
}

impl Decorations {
  pub fn apply(&self, objects: &mut [Annotation]) {
    for object in objects.iter_mut() {
      if self.set_names {
        object.name = Some(result_name(object.quality));
      }
      if self.random_colors && object.classification.is_none() {
        object.color = Some(random_color());
      }
    }
  }
}

pub fn result_name(quality: Option<f64>) -> String {
  match quality {
    Some(q) => format!("SAM (Quality={q:.3})"),
    None => "SAM".to_string(),
  }
}

/// 色相随机，饱和度与亮度落在 [0.5, 1.0)
pub fn random_color() -> u32 {
  let hue = rand::random::<f32>();
  let saturation = 0.5 + rand::random::<f32>() / 2.0;
  let brightness = 0.5 + rand::random::<f32>() / 2.0;
  hsb_to_rgb(hue, saturation, brightness)
}

/// HSB 转 0xRRGGBB
pub fn hsb_to_rgb(hue: f32, saturation: f32, brightness: f32) -> u32 {
  let channel = |v: f32| (v * 255.0 + 0.5) as u32;
  if saturation == 0.0 {
    let v = channel(brightness);
    return (v << 16) | (v << 8) | v;
  }
  let h = (hue - hue.floor()) * 6.0;
  let f = h - h.floor();
  let p = brightness * (1.0 - saturation);
  let q = brightness * (1.0 - saturation * f);
  let t = brightness * (1.0 - saturation * (1.0 - f));
  let (r, g, b) = match h as u32 {
    0 => (brightness, t, p),
    1 => (q, brightness, p),
    2 => (p, brightness, t),
    3 => (p, q, brightness),
    4 => (t, p, brightness),
    _ => (brightness, p, q),
  };
  (channel(r) << 16) | (channel(g) << 8) | channel(b)
}
