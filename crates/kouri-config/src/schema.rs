use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, mapped from `kouri.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KouriConfig {
    pub context: ContextConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub rerank: RerankConfig,
    pub generation: GenerationConfig,
    pub summarizer: SummarizerConfig,
    pub debounce: DebounceConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

// ── Context window ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum (user, assistant) pairs kept per user.
    pub max_pairs: usize,
    /// System prompt seeded at the head of every new window.
    pub system_prompt: Option<String>,
    /// Separator used when folding queued messages into a merged prompt.
    pub message_separator: String,
    pub scoring: ScoringConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_pairs: 30,
            system_prompt: None,
            message_separator: "\n---\n".into(),
            scoring: ScoringConfig::default(),
        }
    }
}

/// Weights for importance-based eviction. Only the relative ordering matters,
/// so every number here is tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub keyword_weight: i32,
    pub time_pattern_weight: i32,
    pub scene_marker_weight: i32,
    pub question_weight: i32,
    pub short_penalty: i32,
    pub long_bonus: i32,
    /// Combined pair length (chars) below which the short penalty applies.
    pub short_length: usize,
    /// Combined pair length (chars) above which the long bonus applies.
    pub long_length: usize,
    /// Salience vocabulary (time, place and activity markers).
    pub keywords: Vec<String>,
    /// Time-expression regexes.
    pub time_patterns: Vec<String>,
    pub scene_marker: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 10,
            time_pattern_weight: 15,
            scene_marker_weight: 20,
            question_weight: 5,
            short_penalty: 5,
            long_bonus: 5,
            short_length: 10,
            long_length: 100,
            keywords: [
                "在实验室", "在家", "睡觉", "工作", "时间", "地点", "今天", "昨天", "明天", "早上",
                "下午", "晚上",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            time_patterns: [r"昨[天晚]", r"今[天晚]", r"(\d+)点", r"早上|上午|中午|下午|晚上"]
                .into_iter()
                .map(String::from)
                .collect(),
            scene_marker: "--- 场景转换 ---".into(),
        }
    }
}

// ── Retrieval ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of documents returned per query.
    pub top_k: usize,
    /// Re-rank the candidate pool with the relevance scorer.
    pub rerank: bool,
    /// Nearest-neighbor backend.
    pub index: IndexKind,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            rerank: false,
            index: IndexKind::Flat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exact in-memory L2 scan.
    Flat,
    /// Parallel L2 scan; falls back to `Flat` when the host cannot run it.
    Accelerated,
}

// ── Embedding ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Vector width of the local hashing embedder.
    pub dimensions: usize,
    /// Zero-vector width used by the remote variant before any real vector was seen.
    pub fallback_dimensions: usize,
    /// Extra attempts per text for the remote variant.
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Local,
            model: "text-embedding-3-small".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            dimensions: 256,
            fallback_dimensions: 1024,
            max_retries: 1,
        }
    }
}

// ── Rerank ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub provider: ProviderKind,
    /// Model used by the remote scorer. Defaults to the generation model.
    pub model: Option<String>,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Local,
            model: None,
        }
    }
}

// ── Generation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Generation attempts per prompt.
    pub max_attempts: u32,
    /// Substrings that mark a response as a failure; such responses are never committed.
    pub failure_markers: Vec<String>,
    /// Friendly phrases shown instead of a raw failure.
    pub fallback_replies: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 2000,
            max_attempts: 3,
            failure_markers: ["API调用失败", "Connection error", "服务暂时不可用", "多次尝试后仍然失败"]
                .into_iter()
                .map(String::from)
                .collect(),
            fallback_replies: vec!["抱歉，我刚刚走神了，可以再说一遍吗？".into()],
        }
    }
}

// ── Summarizer ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Exchange pairs in the raw log before consolidation runs (two lines each).
    pub threshold_pairs: usize,
    pub max_attempts: u32,
    /// Responses containing any of these are treated as "please retry".
    pub retry_sentinels: Vec<String>,
    /// Size cap of the long-term buffer file in bytes.
    pub buffer_cap_bytes: u64,
    /// Entries kept when the cap is exceeded.
    pub keep_entries: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            threshold_pairs: 15,
            max_attempts: 3,
            retry_sentinels: ["请重试", "请稍后再试", "无法总结", "API调用失败", "服务暂时不可用"]
                .into_iter()
                .map(String::from)
                .collect(),
            buffer_cap_bytes: 1024 * 1024,
            keep_entries: 100,
        }
    }
}

impl SummarizerConfig {
    pub fn threshold_lines(&self) -> usize {
        self.threshold_pairs * 2
    }
}

// ── Debounce ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Silence (ms) after the last message before a user's buffer is flushed.
    pub wait_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { wait_ms: 5000 }
    }
}

// ── Storage ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the fact file and per-user logs.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/memory"),
        }
    }
}

impl StorageConfig {
    pub fn facts_path(&self) -> PathBuf {
        self.root.join("memory.json")
    }

    pub fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(sanitize_user_id(user_id))
    }

    pub fn raw_log_path(&self, user_id: &str) -> PathBuf {
        self.user_dir(user_id).join("short_memory.txt")
    }

    pub fn long_term_path(&self, user_id: &str) -> PathBuf {
        self.user_dir(user_id).join("long_memory_buffer.txt")
    }
}

/// Keep user ids usable as directory names. Any id that had to be altered
/// gets a short hash of the original so distinct ids keep distinct dirs.
fn sanitize_user_id(user_id: &str) -> String {
    let cleaned: String = user_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let base = match cleaned.trim() {
        "" | "." | ".." => "_",
        s => s,
    };
    if base == user_id {
        return base.to_string();
    }
    let hash = blake3::hash(user_id.as_bytes()).to_hex();
    format!("{}-{}", base, &hash.as_str()[..8])
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
    /// Log file path (None = stdout only).
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
            file: None,
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl KouriConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Context ───
        if self.context.max_pairs == 0 {
            warnings.push(ConfigWarning {
                field: "context.max_pairs".into(),
                message: "max_pairs is 0: no dialogue would ever be kept".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 30".into()),
            });
        }
        for (i, pattern) in self.context.scoring.time_patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(pattern) {
                warnings.push(ConfigWarning {
                    field: format!("context.scoring.time_patterns[{}]", i),
                    message: format!("invalid regex '{}': {}", pattern, e),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }
        if self.context.scoring.short_length >= self.context.scoring.long_length {
            warnings.push(ConfigWarning {
                field: "context.scoring.short_length".into(),
                message: "short_length should be below long_length".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Defaults are 10 and 100".into()),
            });
        }

        // ── Retrieval ───
        if self.retrieval.top_k == 0 {
            warnings.push(ConfigWarning {
                field: "retrieval.top_k".into(),
                message: "top_k is 0: queries would never return anything".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 5".into()),
            });
        }

        // ── Embedding ───
        match self.embedding.provider {
            ProviderKind::Local if self.embedding.dimensions == 0 => {
                warnings.push(ConfigWarning {
                    field: "embedding.dimensions".into(),
                    message: "local embedding width is 0".into(),
                    severity: WarningSeverity::Error,
                    hint: Some("Set to e.g. 256".into()),
                });
            }
            ProviderKind::Remote => {
                if self.embedding.base_url.is_empty() {
                    warnings.push(ConfigWarning {
                        field: "embedding.base_url".into(),
                        message: "remote embedding needs a base_url".into(),
                        severity: WarningSeverity::Error,
                        hint: Some("Set to e.g. 'https://api.openai.com/v1'".into()),
                    });
                }
                if self.embedding.api_key.is_none() {
                    warnings.push(ConfigWarning {
                        field: "embedding.api_key".into(),
                        message: "no API key for the remote embedding provider".into(),
                        severity: WarningSeverity::Warning,
                        hint: Some("Set embedding.api_key or KOURI_API_KEY".into()),
                    });
                }
                if self.embedding.fallback_dimensions == 0 {
                    warnings.push(ConfigWarning {
                        field: "embedding.fallback_dimensions".into(),
                        message: "fallback width is 0: failed texts would be dropped".into(),
                        severity: WarningSeverity::Warning,
                        hint: Some("Default is 1024".into()),
                    });
                }
            }
            _ => {}
        }

        // ── Rerank ───
        if self.retrieval.rerank
            && self.rerank.provider == ProviderKind::Remote
            && self.generation.api_key.is_none()
        {
            warnings.push(ConfigWarning {
                field: "rerank.provider".into(),
                message: "remote reranking uses the generation endpoint, which has no API key".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set generation.api_key or switch rerank.provider to 'local'".into()),
            });
        }

        // ── Generation ───
        if self.generation.temperature < 0.0 || self.generation.temperature > 2.0 {
            warnings.push(ConfigWarning {
                field: "generation.temperature".into(),
                message: format!("temperature {} is out of range", self.generation.temperature),
                severity: WarningSeverity::Error,
                hint: Some("Temperature must be between 0.0 and 2.0".into()),
            });
        }
        if self.generation.max_tokens == 0 {
            warnings.push(ConfigWarning {
                field: "generation.max_tokens".into(),
                message: "max_tokens is 0: no reply would be produced".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 2000".into()),
            });
        }
        if self.generation.max_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "generation.max_attempts".into(),
                message: "max_attempts is 0: generation would never be called".into(),
                severity: WarningSeverity::Error,
                hint: Some("Default is 3".into()),
            });
        }
        if self.generation.fallback_replies.is_empty() {
            warnings.push(ConfigWarning {
                field: "generation.fallback_replies".into(),
                message: "no fallback replies configured".into(),
                severity: WarningSeverity::Info,
                hint: Some("Failures will surface as an empty reply".into()),
            });
        }

        // ── Summarizer ───
        if self.summarizer.threshold_pairs == 0 {
            warnings.push(ConfigWarning {
                field: "summarizer.threshold_pairs".into(),
                message: "threshold_pairs is 0: summarizer would run on every exchange".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Default is 15".into()),
            });
        }
        if self.summarizer.max_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "summarizer.max_attempts".into(),
                message: "max_attempts is 0: summaries would never be produced".into(),
                severity: WarningSeverity::Error,
                hint: Some("Default is 3".into()),
            });
        }
        if self.summarizer.keep_entries == 0 {
            warnings.push(ConfigWarning {
                field: "summarizer.keep_entries".into(),
                message: "keep_entries is 0: capping would wipe the long-term buffer".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Default is 100".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
