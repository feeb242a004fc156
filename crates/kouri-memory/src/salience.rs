use kouri_config::ScoringConfig;
use kouri_core::{ConversationTurn, KouriError, Result, Role};
use regex::Regex;

/// Prefix of the synthetic "context summary" system turn.
pub const SUMMARY_PREFIX: &str = "当前对话要点：";

/// Importance scoring for (user, assistant) pairs and extraction of the
/// time / place / activity facts that go into the context summary.
pub struct SalienceScorer {
    config: ScoringConfig,
    time_patterns: Vec<Regex>,
    location_re: Regex,
    time_re: Regex,
    activity_re: Regex,
}

impl SalienceScorer {
    pub fn new(config: &ScoringConfig) -> Result<Self> {
        let compile = |p: &str| Regex::new(p).map_err(|e| KouriError::Config(format!("bad pattern '{}': {}", p, e)));
        let time_patterns = config
            .time_patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config: config.clone(),
            time_patterns,
            location_re: compile(r"在(实验室|家|学校|公司|办公室)")?,
            time_re: compile(r"([早中下晚][上午饭]|凌晨|\d+点)")?,
            activity_re: compile(r"(工作|学习|睡觉|休息|实验|写代码|看书)")?,
        })
    }

    /// Score one pair. Higher means more worth keeping.
    pub fn score_pair(&self, user: &str, assistant: &str) -> i32 {
        let c = &self.config;
        let mut score = 0;

        for keyword in &c.keywords {
            if user.contains(keyword.as_str()) || assistant.contains(keyword.as_str()) {
                score += c.keyword_weight;
            }
        }

        for re in &self.time_patterns {
            if re.is_match(user) || re.is_match(assistant) {
                score += c.time_pattern_weight;
            }
        }

        if !c.scene_marker.is_empty() && user.contains(c.scene_marker.as_str()) {
            score += c.scene_marker_weight;
        }

        if user.contains('?') || user.contains('？') {
            score += c.question_weight;
        }

        let length = user.chars().count() + assistant.chars().count();
        if length < c.short_length {
            score -= c.short_penalty;
        } else if length > c.long_length {
            score += c.long_bonus;
        }

        score
    }

    /// Build the summary body from turns given most-recent-first.
    /// System turns are skipped. Returns `None` when nothing was found.
    pub fn summarize<'a, I>(&self, recent_first: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a ConversationTurn>,
    {
        let mut location: Option<String> = None;
        let mut time: Option<String> = None;
        let mut activity: Option<String> = None;

        for turn in recent_first {
            if turn.role == Role::System {
                continue;
            }
            let text = turn.content.as_str();
            if location.is_none() {
                location = self.location_re.find(text).map(|m| m.as_str().to_string());
            }
            if time.is_none() {
                time = self.time_re.find(text).map(|m| m.as_str().to_string());
            }
            if activity.is_none() {
                activity = self.activity_re.find(text).map(|m| m.as_str().to_string());
            }
            if location.is_some() && time.is_some() && activity.is_some() {
                break;
            }
        }

        let mut parts = Vec::new();
        if let Some(t) = time {
            parts.push(format!("时间：{}", t));
        }
        if let Some(l) = location {
            parts.push(format!("地点：{}", l));
        }
        if let Some(a) = activity {
            parts.push(format!("活动：{}", a));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("，"))
        }
    }
}
