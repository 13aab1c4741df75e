//! 4-ary bounding volume hierarchy built with the surface area heuristic.
//!
//! ノードとトライアングルはフラットな配列に 32bit インデックスで格納する。
//! 内部ノードの子は `idx..idx+4` の連続領域。構築は二分 SAH 分割を 2 段
//! 重ねて 4 分木にする（2 段目が利得を出せなければ葉のまま残す）。

use std::cell::RefCell;

use crate::aabb::Aabb;
use crate::aabb4::Aabb4;
use crate::math::{Ray, Vec3};
use crate::mesh;

/// 葉ノードが保持できるトライアングル数の上限。
pub const MAX_LEAF_TRIANGLES: usize = 4;
/// 軸ごとの分割平面の候補数。
const NUM_SPLITS: usize = 5;

/// Möller 系の交差判定で平行・退化とみなす行列式の閾値。
const DETERMINANT_EPSILON: f32 = 5e-7;

/// BVH 内部に複製されたトライアングル。`idx` は所属メッシュの
/// トライアングル配列への逆参照。
#[derive(Clone, Copy, Debug)]
pub struct Triangle {
    pub positions: [Vec3; 3],
    pub idx: usize,
}

impl Triangle {
    fn center(&self) -> Vec3 {
        (self.positions[0] + self.positions[1] + self.positions[2]) / 3.0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Node {
    /// 子 4 つの境界（葉では未使用）。
    pub child_bounds: Aabb4,
    /// 葉ならトライアングル範囲の開始、内部ノードなら先頭の子インデックス。
    /// `i` 番目の子は `idx + i`。
    pub idx: u32,
    /// 0 なら内部ノード。
    pub num_triangles: u32,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.num_triangles != 0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct HitInfo {
    /// 所属メッシュ内のトライアングルインデックス。
    pub triangle_idx: usize,
    pub distance: f32,
    pub position: Vec3,
    pub barycentric_coords: Vec3,
}

pub struct Bvh {
    pub triangles: Vec<Triangle>,
    pub nodes: Vec<Node>,
    pub root_bounds: Aabb,
}

// --- SAH 分割 ---------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
struct SplitInfo {
    axis: usize,
    position: f32,
    left_bbox: Aabb,
    right_bbox: Aabb,
    num_left: usize,
    num_right: usize,
    left_cost: f32,
    right_cost: f32,
}

fn evaluate_split(
    triangles: &[Triangle],
    centers: &[Vec3],
    axis: usize,
    split_position: f32,
) -> SplitInfo {
    let mut left_bbox = Aabb::new();
    let mut right_bbox = Aabb::new();
    let mut num_left = 0usize;
    for (triangle, center) in triangles.iter().zip(centers) {
        if center[axis] < split_position {
            for position in triangle.positions {
                left_bbox.fit(position);
            }
            num_left += 1;
        } else {
            for position in triangle.positions {
                right_bbox.fit(position);
            }
        }
    }
    let num_right = triangles.len() - num_left;
    SplitInfo {
        axis,
        position: split_position,
        left_bbox,
        right_bbox,
        num_left,
        num_right,
        left_cost: num_left as f32 * left_bbox.half_area(),
        right_cost: num_right as f32 * right_bbox.half_area(),
    }
}

/// SAH で最良の二分割を探し、見つかればその場で [L|R] に並べ替える。
/// `best_cost` を下回る候補が無ければ None。
fn try_split_and_partition(
    bounds_min: Vec3,
    bounds_size: Vec3,
    triangles: &mut [Triangle],
    centers: &mut [Vec3],
    mut best_cost: f32,
) -> Option<SplitInfo> {
    let mut best_split: Option<SplitInfo> = None;
    for axis in 0..3 {
        let split_separation = bounds_size[axis] / (NUM_SPLITS + 1) as f32;
        for split in 0..NUM_SPLITS {
            let split_position = bounds_min[axis] + (split + 1) as f32 * split_separation;
            let split_info = evaluate_split(triangles, centers, axis, split_position);
            let cost = split_info.left_cost + split_info.right_cost;
            if cost < best_cost {
                best_cost = cost;
                best_split = Some(split_info);
            }
        }
    }

    let best = best_split?;

    // 中心座標と分割平面の比較でインプレースにスワップ分配する
    let mut num_left = 0usize;
    for i in 0..triangles.len() {
        if centers[i][best.axis] < best.position {
            triangles.swap(i, num_left);
            centers.swap(i, num_left);
            num_left += 1;
        }
    }

    Some(best)
}

// --- トラバーサル ------------------------------------------------------------

#[derive(Clone, Copy)]
struct StackEntry {
    idx: u32,
    distance: f32,
}

thread_local! {
    // ワーカーごとの再利用スタック。割り当てを避けるためだけの存在。
    static TRAVERSAL_STACK: RefCell<Vec<StackEntry>> = const { RefCell::new(Vec::new()) };
}

fn intersect_triangle(
    ray: &Ray,
    triangle: &Triangle,
    min_distance: f32,
    max_distance: f32,
) -> Option<HitInfo> {
    let ab = triangle.positions[0] - triangle.positions[1];
    let ac = triangle.positions[0] - triangle.positions[2];
    let ao = triangle.positions[0] - ray.origin;
    let geometric_normal = ab.cross(ac);
    let determinant = geometric_normal.dot(ray.direction);

    if determinant.abs() < DETERMINANT_EPSILON {
        return None; // レイが三角形と平行
    }

    let inv_determinant = 1.0 / determinant;

    let beta = ao.cross(ac).dot(ray.direction) * inv_determinant;
    if beta < 0.0 || beta > 1.0 {
        return None;
    }

    let gamma = ab.cross(ao).dot(ray.direction) * inv_determinant;
    if gamma < 0.0 || beta + gamma > 1.0 {
        return None;
    }

    let alpha = 1.0 - beta - gamma;

    let t = geometric_normal.dot(ao) * inv_determinant;
    if t < min_distance || t > max_distance {
        return None;
    }

    Some(HitInfo {
        triangle_idx: triangle.idx,
        distance: t,
        position: ray.origin + ray.direction * t,
        barycentric_coords: Vec3::new(alpha, beta, gamma),
    })
}

impl Bvh {
    /// メッシュのトライアングル範囲 [start_idx, start_idx+count) に対して構築する。
    pub fn new(mesh_triangles: &[mesh::Triangle], start_idx: usize, count: usize) -> Self {
        let mut triangles = Vec::with_capacity(count);
        let mut triangle_centers = Vec::with_capacity(count);
        let mut root_bounds = Aabb::new();
        for i in start_idx..start_idx + count {
            let triangle = Triangle {
                positions: mesh_triangles[i].positions,
                idx: i,
            };
            for position in triangle.positions {
                root_bounds.fit(position);
            }
            triangle_centers.push(triangle.center());
            triangles.push(triangle);
        }

        let mut bvh = Self {
            triangles,
            nodes: vec![Node {
                child_bounds: Aabb4::new(),
                idx: 0,
                num_triangles: count as u32,
            }],
            root_bounds,
        };
        let node_cost = count as f32 * bvh.root_bounds.half_area();
        bvh.split(None, 0, node_cost, &mut triangle_centers);
        bvh
    }

    pub fn intersect(&self, ray: &Ray, min_distance: f32, max_distance: f32) -> Option<HitInfo> {
        let root_distance = self.root_bounds.intersect(ray)?;

        TRAVERSAL_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.clear();
            stack.push(StackEntry {
                idx: 0,
                distance: root_distance,
            });

            let mut closest_hit: Option<HitInfo> = None;
            while let Some(StackEntry { idx, distance }) = stack.pop() {
                if closest_hit.as_ref().is_some_and(|h| h.distance < distance) {
                    continue;
                }
                let node = &self.nodes[idx as usize];
                if node.is_leaf() {
                    for i in node.idx..node.idx + node.num_triangles {
                        let hit_info = intersect_triangle(
                            ray,
                            &self.triangles[i as usize],
                            min_distance,
                            max_distance,
                        );
                        if let Some(hit_info) = hit_info {
                            if closest_hit
                                .as_ref()
                                .is_none_or(|c| hit_info.distance < c.distance)
                            {
                                closest_hit = Some(hit_info);
                            }
                        }
                    }
                } else {
                    let mut hit_info = node.child_bounds.intersect(ray);
                    for _ in 0..4 {
                        // 残りのうち最も近いヒットレーンを選ぶ（同値は若いレーン優先）
                        let mut best_idx = None;
                        let mut best_dist = f32::INFINITY;
                        for lane in 0..4 {
                            if hit_info.is_hit[lane] && hit_info.distances[lane] < best_dist {
                                best_dist = hit_info.distances[lane];
                                best_idx = Some(lane);
                            }
                        }
                        let Some(lane) = best_idx else {
                            break;
                        };
                        stack.push(StackEntry {
                            idx: node.idx + lane as u32,
                            distance: best_dist,
                        });
                        // 二重 push 防止
                        hit_info.is_hit[lane] = false;
                    }
                }
            }

            closest_hit
        })
    }

    /// ノードを 4 つの子に分割する。二分 SAH 分割を入れ子で 2 回行い、
    /// 4 葉の合計コストが元のコストを上回るなら分割を破棄する。
    fn split(
        &mut self,
        parent_node_idx: Option<u32>,
        child_idx: usize,
        node_cost: f32,
        triangle_centers: &mut [Vec3],
    ) {
        let node_idx = match parent_node_idx {
            Some(parent) => (self.nodes[parent as usize].idx + child_idx as u32) as usize,
            // 特別扱い: ルートに親は無い
            None => 0,
        };
        if self.nodes[node_idx].num_triangles as usize <= MAX_LEAF_TRIANGLES {
            return; // 分割する価値のない小さな葉
        }

        let (bounds_min, bounds_size) = match parent_node_idx {
            Some(parent) => {
                let child_bounds = &self.nodes[parent as usize].child_bounds;
                (child_bounds.min(child_idx), child_bounds.size(child_idx))
            }
            None => (self.root_bounds.min(), self.root_bounds.size()),
        };

        let first = self.nodes[node_idx].idx as usize;
        let count = self.nodes[node_idx].num_triangles as usize;

        // まず 2 領域への初期分割
        let Some(initial_split) = try_split_and_partition(
            bounds_min,
            bounds_size,
            &mut self.triangles[first..first + count],
            &mut triangle_centers[first..first + count],
            node_cost,
        ) else {
            return;
        };

        // 初期分割で出来た左右それぞれを再分割して計 4 領域にする
        let Some(left_split) = try_split_and_partition(
            initial_split.left_bbox.min(),
            initial_split.left_bbox.size(),
            &mut self.triangles[first..first + initial_split.num_left],
            &mut triangle_centers[first..first + initial_split.num_left],
            node_cost,
        ) else {
            return;
        };

        let Some(right_split) = try_split_and_partition(
            initial_split.right_bbox.min(),
            initial_split.right_bbox.size(),
            &mut self.triangles[first + initial_split.num_left..first + count],
            &mut triangle_centers[first + initial_split.num_left..first + count],
            node_cost,
        ) else {
            return;
        };

        let total_cost = left_split.left_cost
            + left_split.right_cost
            + right_split.left_cost
            + right_split.right_cost;

        if total_cost > node_cost {
            // 個々の分割は良く見えても 4 分割としては割に合わない
            return;
        }

        let first_child_idx = self.nodes.len() as u32;

        self.nodes[node_idx].child_bounds = Aabb4::from_boxes(
            &left_split.left_bbox,
            &left_split.right_bbox,
            &right_split.left_bbox,
            &right_split.right_bbox,
        );

        let mut triangles_idx = self.nodes[node_idx].idx;
        for num_triangles in [
            left_split.num_left,
            left_split.num_right,
            right_split.num_left,
            right_split.num_right,
        ] {
            self.nodes.push(Node {
                child_bounds: Aabb4::new(),
                idx: triangles_idx,
                num_triangles: num_triangles as u32,
            });
            triangles_idx += num_triangles as u32;
        }

        // このノードを内部ノードへ切り替える
        self.nodes[node_idx].num_triangles = 0;
        self.nodes[node_idx].idx = first_child_idx;

        self.split(Some(node_idx as u32), 0, left_split.left_cost, triangle_centers);
        self.split(Some(node_idx as u32), 1, left_split.right_cost, triangle_centers);
        self.split(Some(node_idx as u32), 2, right_split.left_cost, triangle_centers);
        self.split(Some(node_idx as u32), 3, right_split.right_cost, triangle_centers);
    }
}
