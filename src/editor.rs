use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, SceneSyncError};
use crate::frame_source::FrameGate;
use crate::scene::{export_scenes, parse_scene_records, Edge, Enrichment, Scene, SceneRecord, Thumbnail};
use crate::scene_detector::validate_contiguity;

/// 会话内共享的编辑器；异步锁，截帧和远程调用都不在锁内进行
pub type SharedEditor = Arc<tokio::sync::Mutex<SceneEditor>>;

/// 按帧微调时的默认假设帧率
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// 视频末尾截帧时往前回退的秒数（最后一帧之后没有画面）
const END_CAPTURE_MARGIN: f64 = 0.1;

/// 首尾帧截图的 JPEG 质量
const EDGE_FRAME_QUALITY: u8 = 85;

/// 按帧微调的方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

/// 补充信息的种类：首帧分析，或某一边的清理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentKind {
    Analysis,
    Cleaning(Edge),
}

/// 远程调用的凭据：调用期间不持有编辑器锁，结果通过稳定键写回
#[derive(Debug, Clone)]
pub struct EnrichmentTicket {
    key: u64,
    pub scene_id: usize,
    pub kind: EnrichmentKind,
    pub frame: Thumbnail,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutput {
    Text(String),
    Image(Thumbnail),
}

/// 一次边界移动：两侧场景在同一次更新中修改
struct BoundaryMove {
    index: usize,
    neighbor: usize,
    edge: Edge,
    time: f64,
}

/// 按帧微调的计划：先在锁内校验，锁外截帧，再回到锁内写入
#[derive(Debug, Clone)]
pub struct FrameAdjust {
    key: u64,
    pub scene_id: usize,
    pub edge: Edge,
    /// 新的边界时间
    pub time: f64,
    /// 实际截帧时间（靠近视频结尾时回退）
    pub capture_time: f64,
}

impl FrameAdjust {
    /// 只持有帧源锁
    pub fn capture(&self, gate: &FrameGate) -> Result<Thumbnail> {
        Thumbnail::encode_jpeg(&gate.capture_at(self.capture_time)?, EDGE_FRAME_QUALITY)
    }
}

/// 首尾帧截取计划
#[derive(Debug, Clone)]
pub struct EdgeCapture {
    key: u64,
    pub scene_id: usize,
    pub start: f64,
    pub end: f64,
}

impl EdgeCapture {
    pub fn capture(&self, gate: &FrameGate) -> Result<(Thumbnail, Thumbnail)> {
        let start = Thumbnail::encode_jpeg(&gate.capture_at(self.start)?, EDGE_FRAME_QUALITY)?;
        let end = Thumbnail::encode_jpeg(&gate.capture_at(self.end)?, EDGE_FRAME_QUALITY)?;
        Ok((start, end))
    }
}

/// 场景编辑器，所有修改操作都保持场景列表首尾相接
#[derive(Debug, Clone)]
pub struct SceneEditor {
    scenes: Vec<Scene>,
    duration: f64,
    /// 时长来自帧源或分割结果；为 false 时导入会按最后一个场景重新推导
    duration_known: bool,
    frame_rate: f64,
    next_key: u64,
}

impl Default for SceneEditor {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_RATE)
    }
}

impl SceneEditor {
    pub fn new(frame_rate: f64) -> Self {
        Self {
            scenes: Vec::new(),
            duration: 0.0,
            duration_known: false,
            frame_rate,
            next_key: 1,
        }
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn scene(&self, scene_id: usize) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == scene_id)
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// 已知视频时长时（例如打开了视频再导入场景）先设置，导入不会覆盖
    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration;
        self.duration_known = true;
    }

    pub fn frame_duration(&self) -> f64 {
        1.0 / self.frame_rate
    }

    /// 整体替换场景列表（重新分割后调用）
    pub fn replace_scenes(&mut self, scenes: Vec<Scene>, duration: f64) {
        self.duration = duration;
        self.duration_known = true;
        self.scenes = scenes;
        self.assign_keys();
        info!("📋 [场景编辑] 已载入 {} 个场景，视频时长 {:.2}秒", self.scenes.len(), duration);
    }

    /// 从导入的 JSON 整体替换场景列表
    ///
    /// 任一条目缺少 id/startTime/endTime 时整体失败，原列表保持不变。
    /// 不拒绝不连续的数据，只记录警告。
    pub fn load_scenes(&mut self, json: &str) -> Result<()> {
        let records = parse_scene_records(json)?;
        self.load_records(records);
        Ok(())
    }

    pub fn load_records(&mut self, records: Vec<SceneRecord>) {
        self.scenes = records.into_iter().map(Scene::from_record).collect();
        self.assign_keys();
        if !self.duration_known {
            self.duration = self.scenes.last().map(|s| s.end_time).unwrap_or(0.0);
        }
        if let Err(e) = validate_contiguity(&self.scenes, self.duration) {
            warn!("⚠️  [场景编辑] 导入的场景列表不满足连续性: {}", e);
        }
        info!("📂 [场景编辑] 已导入 {} 个场景", self.scenes.len());
    }

    /// 导出为持久化 JSON（不含图片）
    pub fn export(&self) -> Result<String> {
        export_scenes(&self.scenes)
    }

    pub fn clear(&mut self) {
        self.scenes.clear();
    }

    fn assign_keys(&mut self) {
        for scene in &mut self.scenes {
            scene.key = self.next_key;
            self.next_key += 1;
        }
    }

    fn index_of(&self, scene_id: usize) -> Result<usize> {
        self.scenes
            .iter()
            .position(|s| s.id == scene_id)
            .ok_or_else(|| SceneSyncError::scene_not_found(scene_id))
    }

    /// 将场景某一边设置到新的时间点，相邻场景的接触边同步移动
    pub fn set_boundary(&mut self, scene_id: usize, edge: Edge, new_time: f64) -> Result<()> {
        let index = self.index_of(scene_id)?;
        let plan = self.plan_boundary(index, edge, new_time)?;
        self.apply_boundary(&plan, None);
        debug!("🎯 [场景编辑] 场景 {} 的{}边移动到 {:.3}s", scene_id, edge, new_time);
        Ok(())
    }

    /// 将场景某一边前移或后移一帧，并在新位置重新截帧
    ///
    /// 返回新的边界时间。
    pub fn adjust_frame(
        &mut self,
        scene_id: usize,
        edge: Edge,
        direction: Direction,
        gate: &FrameGate,
    ) -> Result<f64> {
        let adjust = self.plan_adjust(scene_id, edge, direction)?;
        let thumbnail = adjust.capture(gate)?;
        self.apply_adjust(&adjust, thumbnail)
    }

    /// 校验按帧微调，不修改状态
    pub fn plan_adjust(&self, scene_id: usize, edge: Edge, direction: Direction) -> Result<FrameAdjust> {
        let index = self.index_of(scene_id)?;
        let delta = match direction {
            Direction::Forward => self.frame_duration(),
            Direction::Backward => -self.frame_duration(),
        };
        let time = self.scenes[index].edge_time(edge) + delta;
        self.plan_boundary(index, edge, time)?;
        Ok(FrameAdjust {
            key: self.scenes[index].key,
            scene_id,
            edge,
            time,
            capture_time: self.capture_time(time),
        })
    }

    /// 写入按帧微调结果；截帧期间列表可能已变化，所以重新校验
    pub fn apply_adjust(&mut self, adjust: &FrameAdjust, thumbnail: Thumbnail) -> Result<f64> {
        let index = self
            .index_of_key(adjust.key)
            .ok_or_else(|| SceneSyncError::scene_not_found(adjust.scene_id))?;
        let plan = self.plan_boundary(index, adjust.edge, adjust.time)?;
        self.apply_boundary(&plan, Some(thumbnail));

        debug!(
            "🎞️  [场景编辑] 场景 {} 的{}边按帧调整到 {:.3}s",
            self.scenes[index].id, adjust.edge, adjust.time
        );
        Ok(adjust.time)
    }

    fn index_of_key(&self, key: u64) -> Option<usize> {
        self.scenes.iter().position(|s| s.key == key)
    }

    /// 校验边界移动；任何一项不满足都拒绝，状态不变
    fn plan_boundary(&self, index: usize, edge: Edge, time: f64) -> Result<BoundaryMove> {
        let scene = &self.scenes[index];
        if scene.is_locked {
            return Err(SceneSyncError::Validation(format!("场景 {} 已锁定", scene.id)));
        }

        let neighbor = match edge {
            Edge::Start => {
                if index == 0 {
                    return Err(SceneSyncError::Validation("第一个场景的起点固定为 0".to_string()));
                }
                index - 1
            }
            Edge::End => {
                if index + 1 >= self.scenes.len() {
                    return Err(SceneSyncError::Validation("最后一个场景的终点固定为视频结尾".to_string()));
                }
                index + 1
            }
        };

        let other = &self.scenes[neighbor];
        if other.is_locked {
            return Err(SceneSyncError::Validation(format!(
                "相邻场景 {} 已锁定，无法移动共享边界",
                other.id
            )));
        }

        let (lower, upper) = match edge {
            Edge::Start => (other.start_time, scene.end_time),
            Edge::End => (scene.start_time, other.end_time),
        };
        if !(lower < time && time < upper) {
            return Err(SceneSyncError::Validation(format!(
                "新的时间点 {:.3}s 必须位于 {:.3}s 与 {:.3}s 之间",
                time, lower, upper
            )));
        }

        Ok(BoundaryMove {
            index,
            neighbor,
            edge,
            time,
        })
    }

    fn apply_boundary(&mut self, plan: &BoundaryMove, thumbnail: Option<Thumbnail>) {
        let (scene, other) = pair_mut(&mut self.scenes, plan.index, plan.neighbor);
        match plan.edge {
            Edge::Start => {
                scene.start_time = plan.time;
                scene.is_start_manually_set = true;
                other.end_time = plan.time;
                other.is_end_manually_set = true;
                if let Some(thumb) = thumbnail {
                    other.end_frame_thumbnail = Some(thumb.clone());
                    scene.start_frame_thumbnail = Some(thumb);
                }
            }
            Edge::End => {
                scene.end_time = plan.time;
                scene.is_end_manually_set = true;
                other.start_time = plan.time;
                other.is_start_manually_set = true;
                if let Some(thumb) = thumbnail {
                    other.start_frame_thumbnail = Some(thumb.clone());
                    scene.end_frame_thumbnail = Some(thumb);
                }
            }
        }
    }

    /// 切换锁定状态，返回新的状态
    pub fn toggle_lock(&mut self, scene_id: usize) -> Result<bool> {
        let index = self.index_of(scene_id)?;
        let scene = &mut self.scenes[index];
        scene.is_locked = !scene.is_locked;
        Ok(scene.is_locked)
    }

    /// 删除场景：前一个场景吸收其时间段；删除首个场景时后一个场景起点拉回 0
    ///
    /// 删除后所有场景重新编号，调用方之前持有的场景编号失效。
    pub fn delete_scene(&mut self, scene_id: usize) -> Result<()> {
        let index = self.index_of(scene_id)?;
        let deleted = &self.scenes[index];
        if deleted.is_locked {
            return Err(SceneSyncError::Validation(format!("场景 {} 已锁定，不能删除", scene_id)));
        }
        if self.scenes.len() == 1 {
            return Err(SceneSyncError::Validation("不能删除唯一的场景".to_string()));
        }
        let (end_time, end_manual) = (deleted.end_time, deleted.is_end_manually_set);

        if index > 0 {
            let prev = &mut self.scenes[index - 1];
            if prev.is_locked {
                return Err(SceneSyncError::Validation(format!(
                    "前一个场景 {} 已锁定，无法吸收被删除的场景",
                    prev.id
                )));
            }
            prev.end_time = end_time;
            prev.is_end_manually_set = end_manual;
        } else {
            let next = &mut self.scenes[1];
            if next.is_locked {
                return Err(SceneSyncError::Validation(format!(
                    "后一个场景 {} 已锁定，无法吸收被删除的场景",
                    next.id
                )));
            }
            next.start_time = 0.0;
            next.is_start_manually_set = false;
        }

        self.scenes.remove(index);
        for (i, scene) in self.scenes.iter_mut().enumerate() {
            scene.id = i + 1;
        }
        debug!("🗑️  [场景编辑] 已删除场景 {}，剩余 {} 个", scene_id, self.scenes.len());
        Ok(())
    }

    /// 截取场景首尾帧，已截取过则跳过；返回是否进行了截取
    pub fn capture_edge_frames(&mut self, scene_id: usize, gate: &FrameGate) -> Result<bool> {
        match self.plan_edge_capture(scene_id)? {
            Some(capture) => {
                let (start, end) = capture.capture(gate)?;
                Ok(self.store_edge_frames(&capture, start, end))
            }
            None => Ok(false),
        }
    }

    /// 首尾帧都已存在时返回 None
    pub fn plan_edge_capture(&self, scene_id: usize) -> Result<Option<EdgeCapture>> {
        let scene = &self.scenes[self.index_of(scene_id)?];
        if scene.start_frame_thumbnail.is_some() && scene.end_frame_thumbnail.is_some() {
            return Ok(None);
        }
        Ok(Some(EdgeCapture {
            key: scene.key,
            scene_id,
            start: scene.start_time,
            end: self.capture_time(scene.end_time),
        }))
    }

    /// 写入截取的首尾帧；场景在截帧期间被删除时返回 false
    pub fn store_edge_frames(&mut self, capture: &EdgeCapture, start: Thumbnail, end: Thumbnail) -> bool {
        let Some(index) = self.index_of_key(capture.key) else {
            debug!("[场景编辑] 场景 {} 已不存在，丢弃截帧结果", capture.scene_id);
            return false;
        };
        let scene = &mut self.scenes[index];
        scene.start_frame_thumbnail = Some(start);
        scene.end_frame_thumbnail = Some(end);
        true
    }

    /// 视频结尾没有可解码的画面，往前回退一点截帧
    fn capture_time(&self, time: f64) -> f64 {
        if self.duration > 0.0 && time >= self.duration {
            (self.duration - END_CAPTURE_MARGIN).max(0.0)
        } else {
            time
        }
    }

    /// 标记某个 (场景, 边) 的补充请求为进行中，并取出待发送的帧
    ///
    /// 同一 (场景, 边) 已有请求在进行中时拒绝。
    pub fn begin_enrichment(&mut self, scene_id: usize, kind: EnrichmentKind) -> Result<EnrichmentTicket> {
        let index = self.index_of(scene_id)?;
        let scene = &mut self.scenes[index];

        let edge = match kind {
            EnrichmentKind::Analysis => Edge::Start,
            EnrichmentKind::Cleaning(edge) => edge,
        };
        let frame = scene.edge_thumbnail(edge).cloned().ok_or_else(|| {
            SceneSyncError::Validation(format!("场景 {} 尚未截取{}帧", scene_id, edge))
        })?;

        let pending = match kind {
            EnrichmentKind::Analysis => scene.analysis.is_pending(),
            EnrichmentKind::Cleaning(edge) => scene.cleaned_frame(edge).is_pending(),
        };
        if pending {
            return Err(SceneSyncError::Validation(format!(
                "场景 {} 的{}帧已有请求在进行中",
                scene_id, edge
            )));
        }

        match kind {
            EnrichmentKind::Analysis => scene.analysis = Enrichment::Pending,
            EnrichmentKind::Cleaning(edge) => *scene.cleaned_frame_mut(edge) = Enrichment::Pending,
        }

        Ok(EnrichmentTicket {
            key: scene.key,
            scene_id,
            kind,
            frame,
        })
    }

    /// 写回远程调用结果；场景在调用期间被删除或替换时返回 false
    pub fn complete_enrichment(&mut self, ticket: &EnrichmentTicket, result: Result<EnrichmentOutput>) -> bool {
        let scene = match self.scenes.iter_mut().find(|s| s.key == ticket.key) {
            Some(scene) => scene,
            None => {
                debug!("[场景编辑] 场景 {} 已不存在，丢弃补充结果", ticket.scene_id);
                return false;
            }
        };

        match (ticket.kind, result) {
            (EnrichmentKind::Analysis, Ok(EnrichmentOutput::Text(text))) => {
                scene.analysis = Enrichment::Available(text);
            }
            (EnrichmentKind::Cleaning(edge), Ok(EnrichmentOutput::Image(image))) => {
                *scene.cleaned_frame_mut(edge) = Enrichment::Available(image);
            }
            (kind, Ok(_)) => {
                set_failed(scene, kind, "远程服务返回的内容类型不匹配".to_string());
            }
            (kind, Err(e)) => {
                set_failed(scene, kind, e.to_string());
            }
        }
        true
    }
}

fn set_failed(scene: &mut Scene, kind: EnrichmentKind, reason: String) {
    match kind {
        EnrichmentKind::Analysis => scene.analysis = Enrichment::Failed(reason),
        EnrichmentKind::Cleaning(edge) => *scene.cleaned_frame_mut(edge) = Enrichment::Failed(reason),
    }
}

/// 同时可变借用两个不同下标的元素
fn pair_mut(scenes: &mut [Scene], a: usize, b: usize) -> (&mut Scene, &mut Scene) {
    if a < b {
        let (left, right) = scenes.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = scenes.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::testing::ScriptedSource;

    /// [0,4) [4,7) [7,10)
    fn editor() -> SceneEditor {
        let mut editor = SceneEditor::default();
        editor.replace_scenes(
            vec![
                Scene::new(1, 0.0, 4.0, None),
                Scene::new(2, 4.0, 7.0, None),
                Scene::new(3, 7.0, 10.0, None),
            ],
            10.0,
        );
        editor
    }

    fn gate() -> FrameGate {
        FrameGate::new(Box::new(ScriptedSource::new(
            10.0,
            vec![(0.0, [10, 10, 10]), (4.0, [120, 60, 200])],
        )))
    }

    fn bounds(editor: &SceneEditor) -> Vec<(usize, f64, f64)> {
        editor.scenes().iter().map(|s| (s.id, s.start_time, s.end_time)).collect()
    }

    #[test]
    fn test_set_start_moves_previous_end() {
        let mut editor = editor();
        editor.set_boundary(2, Edge::Start, 3.5).unwrap();
        assert_eq!(bounds(&editor), vec![(1, 0.0, 3.5), (2, 3.5, 7.0), (3, 7.0, 10.0)]);
        assert!(editor.scenes()[0].is_end_manually_set);
        assert!(editor.scenes()[1].is_start_manually_set);
        validate_contiguity(editor.scenes(), 10.0).unwrap();
    }

    #[test]
    fn test_set_end_moves_next_start() {
        let mut editor = editor();
        editor.set_boundary(2, Edge::End, 9.0).unwrap();
        assert_eq!(bounds(&editor), vec![(1, 0.0, 4.0), (2, 4.0, 9.0), (3, 9.0, 10.0)]);
        assert!(editor.scenes()[1].is_end_manually_set);
        assert!(editor.scenes()[2].is_start_manually_set);
    }

    #[test]
    fn test_set_boundary_rejects_inverted_scene() {
        let mut editor = editor();
        let before = bounds(&editor);
        for t in [7.0, 8.0] {
            let err = editor.set_boundary(2, Edge::Start, t).unwrap_err();
            assert!(matches!(err, SceneSyncError::Validation(_)));
        }
        let err = editor.set_boundary(2, Edge::End, 4.0).unwrap_err();
        assert!(matches!(err, SceneSyncError::Validation(_)));
        // 不能越过相邻场景的另一边
        assert!(editor.set_boundary(2, Edge::Start, 0.0).is_err());
        assert!(editor.set_boundary(2, Edge::End, 10.0).is_err());
        assert!(editor.set_boundary(2, Edge::End, f64::NAN).is_err());
        assert_eq!(bounds(&editor), before);
    }

    #[test]
    fn test_pinned_outer_edges() {
        let mut editor = editor();
        assert!(editor.set_boundary(1, Edge::Start, 1.0).is_err());
        assert!(editor.set_boundary(3, Edge::End, 9.0).is_err());
    }

    #[test]
    fn test_locked_scene_and_locked_neighbor() {
        let mut editor = editor();
        editor.toggle_lock(2).unwrap();
        assert!(editor.set_boundary(2, Edge::Start, 3.0).is_err());
        // 相邻场景锁定时，共享边界不能移动
        assert!(editor.set_boundary(1, Edge::End, 3.0).is_err());
        assert!(editor.set_boundary(3, Edge::Start, 8.0).is_err());
        assert_eq!(bounds(&editor), vec![(1, 0.0, 4.0), (2, 4.0, 7.0), (3, 7.0, 10.0)]);

        assert!(!editor.toggle_lock(2).unwrap());
        editor.set_boundary(3, Edge::Start, 8.0).unwrap();
    }

    #[test]
    fn test_toggle_lock_changes_nothing_else() {
        let mut editor = editor();
        let mut expected = editor.scenes()[0].clone();
        assert!(editor.toggle_lock(1).unwrap());
        expected.is_locked = true;
        assert_eq!(editor.scenes()[0], expected);
    }

    #[test]
    fn test_delete_middle_scene() {
        let mut editor = editor();
        editor.scenes[1].is_end_manually_set = true;
        editor.delete_scene(2).unwrap();
        assert_eq!(bounds(&editor), vec![(1, 0.0, 7.0), (2, 7.0, 10.0)]);
        assert!(editor.scenes()[0].is_end_manually_set);
        validate_contiguity(editor.scenes(), 10.0).unwrap();
    }

    #[test]
    fn test_delete_last_scene_keeps_span() {
        let mut editor = editor();
        editor.delete_scene(3).unwrap();
        assert_eq!(bounds(&editor), vec![(1, 0.0, 4.0), (2, 4.0, 10.0)]);
    }

    #[test]
    fn test_delete_first_scene() {
        let mut editor = editor();
        editor.set_boundary(2, Edge::Start, 3.0).unwrap();
        editor.delete_scene(1).unwrap();
        assert_eq!(bounds(&editor), vec![(1, 0.0, 7.0), (2, 7.0, 10.0)]);
        assert!(!editor.scenes()[0].is_start_manually_set);
    }

    #[test]
    fn test_delete_only_scene_rejected() {
        let mut editor = SceneEditor::default();
        editor.replace_scenes(vec![Scene::new(1, 0.0, 10.0, None)], 10.0);
        let err = editor.delete_scene(1).unwrap_err();
        assert!(matches!(err, SceneSyncError::Validation(_)));
        assert_eq!(bounds(&editor), vec![(1, 0.0, 10.0)]);
    }

    #[test]
    fn test_delete_locked_rejected() {
        let mut editor = editor();
        editor.toggle_lock(2).unwrap();
        assert!(matches!(editor.delete_scene(2), Err(SceneSyncError::Validation(_))));
        // 吸收方被锁定时同样拒绝
        assert!(editor.delete_scene(3).is_err());
        assert_eq!(editor.scenes().len(), 3);
        assert!(editor.delete_scene(42).is_err());
    }

    #[test]
    fn test_adjust_frame_forward_and_backward() {
        let mut editor = editor();
        let gate = gate();
        let t = editor.adjust_frame(2, Edge::Start, Direction::Backward, &gate).unwrap();
        assert!((t - (4.0 - 1.0 / 30.0)).abs() < 1e-12);
        assert_eq!(editor.scenes()[0].end_time, t);
        assert_eq!(editor.scenes()[1].start_time, t);
        // 两侧接触边共享同一张截图
        assert!(editor.scenes()[1].start_frame_thumbnail.is_some());
        assert_eq!(
            editor.scenes()[0].end_frame_thumbnail,
            editor.scenes()[1].start_frame_thumbnail
        );

        let t = editor.adjust_frame(2, Edge::End, Direction::Forward, &gate).unwrap();
        assert!((t - (7.0 + 1.0 / 30.0)).abs() < 1e-12);
        assert_eq!(editor.scenes()[2].start_time, t);
        validate_contiguity(editor.scenes(), 10.0).unwrap();
    }

    #[test]
    fn test_adjust_revalidates_after_capture() {
        let mut editor = editor();
        let gate = gate();
        let adjust = editor.plan_adjust(2, Edge::Start, Direction::Backward).unwrap();
        let thumbnail = adjust.capture(&gate).unwrap();

        // 截帧期间前一个场景被锁定
        editor.toggle_lock(1).unwrap();
        let err = editor.apply_adjust(&adjust, thumbnail.clone()).unwrap_err();
        assert!(matches!(err, SceneSyncError::Validation(_)));
        assert_eq!(bounds(&editor), vec![(1, 0.0, 4.0), (2, 4.0, 7.0), (3, 7.0, 10.0)]);

        // 截帧期间场景被重新编号，结果仍写到同一个场景
        editor.toggle_lock(1).unwrap();
        let adjust = editor.plan_adjust(3, Edge::Start, Direction::Forward).unwrap();
        editor.delete_scene(1).unwrap();
        let t = editor.apply_adjust(&adjust, thumbnail).unwrap();
        assert_eq!(editor.scene(2).unwrap().start_time, t);
        assert!(editor.scene(2).unwrap().start_frame_thumbnail.is_some());
    }

    #[test]
    fn test_adjust_frame_rejected_when_locked() {
        let mut editor = editor();
        editor.toggle_lock(1).unwrap();
        let err = editor
            .adjust_frame(2, Edge::Start, Direction::Forward, &gate())
            .unwrap_err();
        assert!(matches!(err, SceneSyncError::Validation(_)));
        assert!(editor.scenes()[1].start_frame_thumbnail.is_none());
    }

    #[test]
    fn test_capture_edge_frames_once() {
        let mut editor = editor();
        let gate = gate();
        assert!(editor.capture_edge_frames(3, &gate).unwrap());
        assert!(editor.scenes()[2].end_frame_thumbnail.is_some());
        assert!(!editor.capture_edge_frames(3, &gate).unwrap());
    }

    #[test]
    fn test_load_and_export() {
        let mut editor = SceneEditor::default();
        let json = r#"[{"id":1,"startTime":0,"endTime":5,"isLocked":true},{"id":2,"startTime":5,"endTime":8}]"#;
        editor.load_scenes(json).unwrap();
        assert_eq!(editor.duration(), 8.0);
        assert!(editor.scenes()[0].is_locked);

        let exported: serde_json::Value = serde_json::from_str(&editor.export().unwrap()).unwrap();
        assert_eq!(exported.as_array().unwrap().len(), 2);
        assert_eq!(exported[1]["startTime"], 5.0);
    }

    #[test]
    fn test_reimport_rederives_duration_without_video() {
        let mut editor = SceneEditor::default();
        editor.load_scenes(r#"[{"id":1,"startTime":0,"endTime":5}]"#).unwrap();
        assert_eq!(editor.duration(), 5.0);
        editor
            .load_scenes(r#"[{"id":1,"startTime":0,"endTime":4},{"id":2,"startTime":4,"endTime":12}]"#)
            .unwrap();
        assert_eq!(editor.duration(), 12.0);

        // 时长来自视频时导入不覆盖
        let mut editor = SceneEditor::default();
        editor.set_duration(20.0);
        editor.load_scenes(r#"[{"id":1,"startTime":0,"endTime":5}]"#).unwrap();
        assert_eq!(editor.duration(), 20.0);
    }

    #[test]
    fn test_failed_load_keeps_previous_list() {
        let mut editor = editor();
        let err = editor.load_scenes(r#"[{"id":1,"endTime":5}]"#).unwrap_err();
        assert!(matches!(err, SceneSyncError::Format(_)));
        assert_eq!(editor.scenes().len(), 3);
    }

    #[test]
    fn test_load_accepts_non_contiguous_data() {
        let mut editor = SceneEditor::default();
        editor
            .load_scenes(r#"[{"id":1,"startTime":0,"endTime":3},{"id":2,"startTime":4,"endTime":8}]"#)
            .unwrap();
        assert_eq!(editor.scenes().len(), 2);
    }

    #[test]
    fn test_enrichment_single_flight() {
        let mut editor = editor();
        let gate = gate();
        assert!(editor.begin_enrichment(1, EnrichmentKind::Analysis).is_err());

        editor.capture_edge_frames(1, &gate).unwrap();
        let ticket = editor.begin_enrichment(1, EnrichmentKind::Analysis).unwrap();
        assert!(editor.scenes()[0].analysis.is_pending());
        assert!(editor.begin_enrichment(1, EnrichmentKind::Analysis).is_err());
        // 不同的 (场景, 边) 互不影响
        let clean = editor
            .begin_enrichment(1, EnrichmentKind::Cleaning(Edge::End))
            .unwrap();

        assert!(editor.complete_enrichment(&ticket, Ok(EnrichmentOutput::Text("中景".to_string()))));
        assert_eq!(editor.scenes()[0].analysis, Enrichment::Available("中景".to_string()));

        let err = SceneSyncError::RemoteService("503".to_string());
        assert!(editor.complete_enrichment(&clean, Err(err)));
        assert!(matches!(editor.scenes()[0].cleaned_end_frame, Enrichment::Failed(_)));
        assert_eq!(editor.scenes()[0].end_time, 4.0);
    }

    #[test]
    fn test_enrichment_result_follows_renumbered_scene() {
        let mut editor = editor();
        let gate = gate();
        editor.capture_edge_frames(2, &gate).unwrap();
        let ticket = editor.begin_enrichment(2, EnrichmentKind::Analysis).unwrap();

        editor.delete_scene(1).unwrap();
        assert!(editor.complete_enrichment(&ticket, Ok(EnrichmentOutput::Text("远景".to_string()))));
        assert_eq!(editor.scene(1).unwrap().analysis.value().map(String::as_str), Some("远景"));

        editor.replace_scenes(vec![Scene::new(1, 0.0, 10.0, None)], 10.0);
        assert!(!editor.complete_enrichment(&ticket, Ok(EnrichmentOutput::Text("x".to_string()))));
    }
}
