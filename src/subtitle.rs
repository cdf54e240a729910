//! SRT 字幕解析、格式化，以及按场景边界重新切分字幕

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SceneSyncError};
use crate::scene::Scene;

/// 重叠时长不超过该值（秒）的字幕碎片被丢弃
pub const DEFAULT_MIN_OVERLAP: f64 = 0.1;

static BLOCK_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n\r?\n").unwrap());

static TIMING_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}:\d{2}:\d{2},\d{3})\s*-->\s*(\d{2}:\d{2}:\d{2},\d{3})").unwrap()
});

static TIMESTAMP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{2}):(\d{2}):(\d{2}),(\d{3})$").unwrap());

/// 单条字幕
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtitle {
    pub id: usize,
    /// 开始时间（秒）
    pub start_time: f64,
    /// 结束时间（秒）
    pub end_time: f64,
    pub text: String,
}

/// 解析 SRT 文本；格式错误的块被跳过
pub fn parse_srt(content: &str) -> Vec<Subtitle> {
    // Windows 编辑器保存的文件常带 BOM
    let content = content.trim_start_matches('\u{feff}').trim();
    if content.is_empty() {
        return Vec::new();
    }

    let mut subtitles = Vec::new();
    for (index, block) in BLOCK_SEPARATOR.split(content).enumerate() {
        match parse_block(block) {
            Ok(subtitle) => subtitles.push(subtitle),
            Err(e) => debug!("跳过第 {} 个字幕块: {}", index + 1, e),
        }
    }
    subtitles
}

fn parse_block(block: &str) -> Result<Subtitle> {
    let lines: Vec<&str> = block.lines().collect();
    if lines.len() < 3 {
        return Err(SceneSyncError::Format(format!("字幕块行数不足: {}", lines.len())));
    }

    let id: usize = lines[0]
        .trim()
        .parse()
        .map_err(|_| SceneSyncError::Format(format!("无效的字幕序号: {:?}", lines[0])))?;
    if id == 0 {
        return Err(SceneSyncError::Format("字幕序号不能为 0".to_string()));
    }

    let caps = TIMING_LINE
        .captures(lines[1])
        .ok_or_else(|| SceneSyncError::Format(format!("无效的时间轴: {:?}", lines[1])))?;
    let start_time = parse_timestamp(&caps[1])?;
    let end_time = parse_timestamp(&caps[2])?;
    if start_time >= end_time {
        return Err(SceneSyncError::Format(format!(
            "字幕 {} 的开始时间不早于结束时间",
            id
        )));
    }

    Ok(Subtitle {
        id,
        start_time,
        end_time,
        text: lines[2..].join("\n"),
    })
}

/// 解析 `HH:MM:SS,mmm` 为秒
pub fn parse_timestamp(value: &str) -> Result<f64> {
    let caps = TIMESTAMP
        .captures(value.trim())
        .ok_or_else(|| SceneSyncError::Format(format!("无效的时间戳: {:?}", value)))?;
    let field = |i: usize| -> Result<f64> {
        caps[i]
            .parse::<u32>()
            .map(f64::from)
            .map_err(|_| SceneSyncError::Format(format!("无效的时间戳: {:?}", value)))
    };
    Ok(field(1)? * 3600.0 + field(2)? * 60.0 + field(3)? + field(4)? / 1000.0)
}

/// 将秒格式化为 `HH:MM:SS,mmm`（四舍五入到毫秒）
pub fn format_timestamp(total_seconds: f64) -> String {
    let total_ms = (total_seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1_000;
    let millis = total_ms % 1_000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// 生成 SRT 文本
pub fn to_srt(subtitles: &[Subtitle]) -> String {
    let mut out = String::new();
    for subtitle in subtitles {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            subtitle.id,
            format_timestamp(subtitle.start_time),
            format_timestamp(subtitle.end_time),
            subtitle.text
        ));
    }
    out
}

/// 用场景区间切分字幕：每个场景与每条字幕求交集，保留长度超过 `min_overlap` 的部分
///
/// 输出按场景优先、字幕次之的顺序排列，序号从 1 重新编号。
pub fn retime(subtitles: &[Subtitle], scenes: &[Scene], min_overlap: f64) -> Vec<Subtitle> {
    let mut adapted = Vec::new();
    for scene in scenes {
        for subtitle in subtitles {
            let overlap_start = scene.start_time.max(subtitle.start_time);
            let overlap_end = scene.end_time.min(subtitle.end_time);
            if overlap_start < overlap_end && overlap_end - overlap_start > min_overlap {
                adapted.push(Subtitle {
                    id: adapted.len() + 1,
                    start_time: overlap_start,
                    end_time: overlap_end,
                    text: subtitle.text.clone(),
                });
            }
        }
    }
    adapted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(id: usize, start: f64, end: f64, text: &str) -> Subtitle {
        Subtitle {
            id,
            start_time: start,
            end_time: end,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_parse_srt_lf_and_crlf() {
        let lf = "1\n00:00:01,000 --> 00:00:02,500\nHello\nworld\n\n2\n00:00:03,000 --> 00:00:04,000\nBye\n";
        let crlf = lf.replace('\n', "\r\n");
        for content in [lf.to_string(), crlf] {
            let subs = parse_srt(&content);
            assert_eq!(subs.len(), 2);
            assert_eq!(subs[0], sub(1, 1.0, 2.5, "Hello\nworld"));
            assert_eq!(subs[1].text, "Bye");
        }
    }

    #[test]
    fn test_parse_srt_with_bom_keeps_first_cue() {
        let content = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,000\r\nfirst\r\n\r\n\
                       2\r\n00:00:03,000 --> 00:00:04,000\r\nsecond\r\n";
        let subs = parse_srt(content);
        let ids: Vec<usize> = subs.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(subs[0].text, "first");
    }

    #[test]
    fn test_parse_srt_skips_malformed_blocks() {
        let content = "1\n00:00:01,000 --> 00:00:02,000\nok\n\n\
                       x\n00:00:03,000 --> 00:00:04,000\nbad id\n\n\
                       3\n00:00:05 --> 00:00:06,000\nbad timing\n\n\
                       4\n00:00:07,000 --> 00:00:08,000\n\n\
                       5\n00:00:09,000 --> 00:00:10,000\nlast";
        let subs = parse_srt(content);
        let ids: Vec<usize> = subs.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 5]);
        assert!(parse_srt("  \n").is_empty());
    }

    #[test]
    fn test_timestamp_round_trip() {
        assert_eq!(format_timestamp(3725.4), "01:02:05,400");
        let parsed = parse_timestamp("01:02:05,400").unwrap();
        assert!((parsed - 3725.4).abs() < 0.001);
        assert_eq!(format_timestamp(59.9996), "00:01:00,000");
        assert!(parse_timestamp("1:02:05,400").is_err());
    }

    #[test]
    fn test_retime_clips_to_scene() {
        let scenes = vec![Scene::new(1, 0.0, 10.0, None)];
        let adapted = retime(&[sub(7, 5.0, 12.0, "hello")], &scenes, DEFAULT_MIN_OVERLAP);
        assert_eq!(adapted, vec![sub(1, 5.0, 10.0, "hello")]);
    }

    #[test]
    fn test_retime_drops_slivers() {
        let scenes = vec![Scene::new(1, 0.0, 10.0, None)];
        assert!(retime(&[sub(1, 5.0, 5.05, "tiny")], &scenes, DEFAULT_MIN_OVERLAP).is_empty());
    }

    #[test]
    fn test_retime_splits_across_scenes_in_scene_order() {
        let scenes = vec![
            Scene::new(1, 0.0, 4.0, None),
            Scene::new(2, 4.0, 9.0, None),
        ];
        let subs = vec![sub(1, 1.0, 2.0, "a"), sub(2, 3.0, 6.0, "b"), sub(3, 8.95, 12.0, "c")];
        let adapted = retime(&subs, &scenes, DEFAULT_MIN_OVERLAP);
        assert_eq!(
            adapted,
            vec![
                sub(1, 1.0, 2.0, "a"),
                sub(2, 3.0, 4.0, "b"),
                sub(3, 4.0, 6.0, "b"),
            ]
        );
    }

    #[test]
    fn test_to_srt_parses_back() {
        let subs = vec![sub(1, 0.5, 1.25, "one"), sub(2, 61.0, 62.0, "two\nlines")];
        let text = to_srt(&subs);
        assert!(text.starts_with("1\n00:00:00,500 --> 00:00:01,250\none\n\n"));
        assert_eq!(parse_srt(&text), subs);
    }
}
