//! 监控区域 (Zone of interest)
//!
//! 矩形 (两个角点) 或多边形 (有序顶点)。区域整体替换, 不做局部修改。
//! 边界上的点算作区域内。

use serde::{Deserialize, Serialize};

use crate::error::{Result, SentinelError};

/// 多边形编辑器最多接收的点击数
pub const EDITOR_VERTICES: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Zone {
    Rect { x1: i32, y1: i32, x2: i32, y2: i32 },
    Polygon { points: Vec<(i32, i32)> },
}

impl Zone {
    /// 矩形区域, 角点顺序任意
    pub fn rect(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self> {
        if [x1, y1, x2, y2].iter().any(|v| *v < 0) {
            return Err(SentinelError::invalid_zone(format!(
                "negative corner in ({x1},{y1},{x2},{y2})"
            )));
        }
        if x1 == x2 || y1 == y2 {
            return Err(SentinelError::invalid_zone(format!(
                "degenerate rectangle ({x1},{y1},{x2},{y2})"
            )));
        }
        Ok(Zone::Rect {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        })
    }

    pub fn polygon(points: Vec<(i32, i32)>) -> Result<Self> {
        if points.len() < 3 {
            return Err(SentinelError::invalid_zone(format!(
                "polygon needs at least 3 vertices, got {}",
                points.len()
            )));
        }
        if points.iter().any(|(x, y)| *x < 0 || *y < 0) {
            return Err(SentinelError::invalid_zone("negative polygon vertex"));
        }
        Ok(Zone::Polygon { points })
    }

    /// 重新校验 (反序列化得到的区域没有经过构造函数)
    pub fn validated(self) -> Result<Self> {
        match self {
            Zone::Rect { x1, y1, x2, y2 } => Zone::rect(x1, y1, x2, y2),
            Zone::Polygon { points } => Zone::polygon(points),
        }
    }

    /// 点是否在区域内 (含边界)
    pub fn contains(&self, x: i32, y: i32) -> bool {
        match self {
            Zone::Rect { x1, y1, x2, y2 } => *x1 <= x && x <= *x2 && *y1 <= y && y <= *y2,
            Zone::Polygon { points } => polygon_contains(points, x, y),
        }
    }

    /// 轮廓顶点 (绘制用), 首尾不重复
    pub fn outline(&self) -> Vec<(i32, i32)> {
        match self {
            Zone::Rect { x1, y1, x2, y2 } => vec![(*x1, *y1), (*x2, *y1), (*x2, *y2), (*x1, *y2)],
            Zone::Polygon { points } => points.clone(),
        }
    }
}

fn on_segment(a: (i32, i32), b: (i32, i32), p: (i32, i32)) -> bool {
    let (ax, ay) = (a.0 as i64, a.1 as i64);
    let (bx, by) = (b.0 as i64, b.1 as i64);
    let (px, py) = (p.0 as i64, p.1 as i64);
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    cross == 0 && px >= ax.min(bx) && px <= ax.max(bx) && py >= ay.min(by) && py <= ay.max(by)
}

fn polygon_contains(points: &[(i32, i32)], x: i32, y: i32) -> bool {
    let n = points.len();
    for i in 0..n {
        if on_segment(points[i], points[(i + 1) % n], (x, y)) {
            return true;
        }
    }

    // 射线法 (even-odd)
    let (px, py) = (x as f64, y as f64);
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (points[i].0 as f64, points[i].1 as f64);
        let (xj, yj) = (points[j].0 as f64, points[j].1 as f64);
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// 坐标值: 数字或数字字符串 ("10")
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coord {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Coord {
    fn to_i32(&self, name: &str) -> Result<i32> {
        let value = match self {
            Coord::Int(v) => *v as f64,
            Coord::Float(v) => *v,
            Coord::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                SentinelError::invalid_zone(format!("{name}: '{s}' is not a number"))
            })?,
        };
        if !value.is_finite() || value.abs() > i32::MAX as f64 {
            return Err(SentinelError::invalid_zone(format!("{name}: out of range")));
        }
        Ok(value.trunc() as i32)
    }
}

/// 区域更新请求 (HTTP / 配置文件)
///
/// `{"x1":..,"y1":..,"x2":..,"y2":..}` 或 `{"points":[[x,y],..]}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x1: Option<Coord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y1: Option<Coord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x2: Option<Coord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y2: Option<Coord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<(Coord, Coord)>>,
}

impl ZoneRequest {
    pub fn rect(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: Some(Coord::Int(x1 as i64)),
            y1: Some(Coord::Int(y1 as i64)),
            x2: Some(Coord::Int(x2 as i64)),
            y2: Some(Coord::Int(y2 as i64)),
            points: None,
        }
    }

    /// 解析为区域; 缺失或部分坐标一律拒绝
    pub fn to_zone(&self) -> Result<Zone> {
        if let Some(points) = &self.points {
            if self.x1.is_some() || self.y1.is_some() || self.x2.is_some() || self.y2.is_some() {
                return Err(SentinelError::invalid_zone(
                    "both corners and points given",
                ));
            }
            let vertices = points
                .iter()
                .enumerate()
                .map(|(i, (x, y))| Ok((x.to_i32(&format!("points[{i}].x"))?, y.to_i32(&format!("points[{i}].y"))?)))
                .collect::<Result<Vec<_>>>()?;
            return Zone::polygon(vertices);
        }

        let corner = |c: &Option<Coord>, name: &str| -> Result<i32> {
            c.as_ref()
                .ok_or_else(|| SentinelError::invalid_zone(format!("missing {name}")))?
                .to_i32(name)
        };
        Zone::rect(
            corner(&self.x1, "x1")?,
            corner(&self.y1, "y1")?,
            corner(&self.x2, "x2")?,
            corner(&self.y2, "y2")?,
        )
    }
}

/// 点击式多边形编辑器
///
/// 点击缓冲归编辑器自己所有, 凑满 4 个点后生成多边形区域。
#[derive(Debug, Default, Clone)]
pub struct ZoneEditor {
    clicks: Vec<(i32, i32)>,
}

impl ZoneEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个顶点; 已满时忽略, 返回是否被接收
    pub fn click(&mut self, x: i32, y: i32) -> bool {
        if self.clicks.len() >= EDITOR_VERTICES {
            return false;
        }
        self.clicks.push((x, y));
        true
    }

    pub fn reset(&mut self) {
        self.clicks.clear();
    }

    pub fn clicks(&self) -> &[(i32, i32)] {
        &self.clicks
    }

    /// 点满后生成区域
    pub fn complete(&self) -> Option<Result<Zone>> {
        (self.clicks.len() == EDITOR_VERTICES).then(|| Zone::polygon(self.clicks.clone()))
    }
}
