//! 翻译模块
//!
//! 提供：
//! - `TextBackend`：文本生成服务的抽象（单次调用 `translate(prompt) -> text`）
//! - `HttpBackend`：OpenAI兼容 `/chat/completions` 接口的实现
//! - `ChunkAligner`：逐行编号协议，保证每批返回的译文数量与顺序和输入严格一致
//! - `translate_pending`：按批翻译尚未翻译的位置，并做增量修复

// 标准库导入
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

// 第三方crate导入
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

// 本地模块导入
use crate::config::TranslateConfig;
use crate::error::Result;
use crate::translation_error;

/// 文本生成服务错误
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// 连接或传输失败
    Transport(String),
    /// 请求超时
    Timeout,
    /// 非成功HTTP状态
    Http { status: u16, body: String },
    /// 响应结构无法识别
    InvalidResponse(String),
}

impl BackendError {
    /// 是否值得重试：传输错误、超时、5xx、408、429可重试；其余4xx不可恢复
    pub fn is_recoverable(&self) -> bool {
        match self {
            BackendError::Transport(_) | BackendError::Timeout | BackendError::InvalidResponse(_) => {
                true
            }
            BackendError::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
        }
    }

    /// 对应的HTTP状态码（无则为0）
    pub fn status_code(&self) -> u16 {
        match self {
            BackendError::Http { status, .. } => *status,
            _ => 0,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Transport(details) => write!(f, "传输失败: {}", details),
            BackendError::Timeout => write!(f, "请求超时"),
            BackendError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            BackendError::InvalidResponse(details) => write!(f, "响应无法解析: {}", details),
        }
    }
}

impl std::error::Error for BackendError {}

/// 文本生成服务
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// 单次调用
    async fn translate(&self, prompt: &str) -> std::result::Result<String, BackendError>;

    /// 增量回调变体，默认一次性回调完整结果
    async fn translate_streaming(
        &self,
        prompt: &str,
        on_chunk: &(dyn for<'s> Fn(&'s str) + Send + Sync),
    ) -> std::result::Result<String, BackendError> {
        let text = self.translate(prompt).await?;
        on_chunk(&text);
        Ok(text)
    }

    /// 服务地址，用于错误信息
    fn endpoint(&self) -> &str;
}

/// OpenAI兼容接口
pub struct HttpBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl HttpBackend {
    pub fn new(config: &TranslateConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs()))
            .build()
            .map_err(|e| translation_error!(config, "http_client", e))?;

        Ok(Self {
            client,
            endpoint: completions_endpoint(config.api_url()),
            model: config.model().to_string(),
            api_key: config.api_key().map(str::to_string),
            temperature: config.temperature(),
            max_tokens: config.max_tokens(),
        })
    }
}

/// 由API基础地址得到chat/completions地址
pub fn completions_endpoint(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

#[async_trait]
impl TextBackend for HttpBackend {
    async fn translate(&self, prompt: &str) -> std::result::Result<String, BackendError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout
            } else {
                BackendError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let value: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout
            } else {
                BackendError::InvalidResponse(e.to_string())
            }
        })?;

        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BackendError::InvalidResponse("缺少 choices[0].message.content".to_string()))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// 重试间隔策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// 固定间隔
    Fixed,
    /// 每次翻倍
    Exponential,
}

/// 有界重试策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// 第 `attempt` 次（从1开始）失败后的等待时间
    pub fn delay_after(&self, attempt: usize) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 1u32 << (attempt.saturating_sub(1).min(16) as u32);
                self.delay.saturating_mul(factor)
            }
        }
    }
}

/// 协作式取消标志
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 提示词模板
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub base_prompt: String,
    pub target_language: String,
    /// 术语表：原文 -> 译文
    pub glossary: BTreeMap<String, String>,
}

impl PromptTemplate {
    pub fn from_config(config: &TranslateConfig) -> Self {
        Self {
            base_prompt: config.prompt().to_string(),
            target_language: config.target_lang().to_string(),
            glossary: config.glossary().clone(),
        }
    }

    /// 组装完整提示词
    pub fn build(&self, tagged_lines: &str) -> String {
        let mut prompt = String::new();
        prompt.push_str(self.base_prompt.trim());
        prompt.push_str("\n\n");

        if !self.glossary.is_empty() {
            prompt.push_str("术语表（必须按此翻译）：\n");
            for (source, target) in &self.glossary {
                prompt.push_str(&format!("{} → {}\n", source, target));
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!("目标语言：{}\n", self.target_language));
        prompt.push_str(
            "下面每行以 [编号] 开头。请逐行翻译，输出行数与输入一致，每行保留原样的 [编号] 前缀，不要合并或拆分行。\n\n",
        );
        prompt.push_str(tagged_lines);
        prompt
    }
}

/// 响应行的编号前缀：`[n] 文本`
static MARKER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[(\d+)\]\s?(.*)$").expect("Invalid marker regex"));

/// 为每行加上批内编号（从1开始），行内换行压成空格
pub fn tag_lines(lines: &[String]) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let single_line = line.split_whitespace().collect::<Vec<_>>().join(" ");
            format!("[{}] {}", i + 1, single_line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 解析后的响应：带编号的行与无编号溢出队列
#[derive(Debug, Default, PartialEq)]
pub struct TaggedResponse {
    pub marked: BTreeMap<usize, String>,
    pub overflow: VecDeque<String>,
}

/// 解析服务响应
///
/// 空白行忽略；编号越界或重复的行去掉编号后进入溢出队列
pub fn parse_tagged_response(response: &str, expected: usize) -> TaggedResponse {
    let mut parsed = TaggedResponse::default();
    for line in response.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let Some(captures) = MARKER_PATTERN.captures(line) else {
            parsed.overflow.push_back(line.trim().to_string());
            continue;
        };
        let text = captures
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        let index = captures.get(1).and_then(|m| m.as_str().parse::<usize>().ok());

        match index {
            Some(index) if (1..=expected).contains(&index) && !parsed.marked.contains_key(&index) => {
                parsed.marked.insert(index, text);
            }
            _ => parsed.overflow.push_back(text),
        }
    }

    parsed
}

/// 把响应重建为恰好 `expected` 个元素：编号优先，其次按顺序取溢出行，最后补空串
pub fn align_response(response: &str, expected: usize) -> Vec<String> {
    let TaggedResponse {
        mut marked,
        mut overflow,
    } = parse_tagged_response(response, expected);

    let aligned: Vec<String> = (1..=expected)
        .map(|index| {
            marked
                .remove(&index)
                .or_else(|| overflow.pop_front())
                .unwrap_or_default()
        })
        .collect();

    if !overflow.is_empty() {
        debug!("丢弃多余的响应行: {} 行", overflow.len());
    }
    aligned
}

/// 单批翻译结果
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// 成功，长度与输入一致
    Translated(Vec<String>),
    /// 重试耗尽，全部为空占位
    SoftFailure(Vec<String>),
    /// 调用前观察到取消
    Cancelled,
}

/// 逐行编号对齐器
pub struct ChunkAligner<B> {
    backend: B,
    template: PromptTemplate,
    retry: RetryPolicy,
}

impl<B: TextBackend> ChunkAligner<B> {
    pub fn new(backend: B, template: PromptTemplate, retry: RetryPolicy) -> Self {
        Self {
            backend,
            template,
            retry,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// 翻译一批文本行
    ///
    /// 不可恢复的服务错误立即返回 `TranslationApi`；可恢复错误与空响应在重试耗尽后软失败
    pub async fn translate_batch(&self, lines: &[String], cancel: &CancelFlag) -> Result<BatchOutcome> {
        if lines.is_empty() {
            return Ok(BatchOutcome::Translated(Vec::new()));
        }

        let prompt = self.template.build(&tag_lines(lines));

        for attempt in 1..=self.retry.max_attempts {
            if cancel.is_cancelled() {
                return Ok(BatchOutcome::Cancelled);
            }

            match self.backend.translate(&prompt).await {
                Ok(response) if !response.trim().is_empty() => {
                    return Ok(BatchOutcome::Translated(align_response(&response, lines.len())));
                }
                Ok(_) => warn!("⚠️  第 {} 次尝试返回空响应", attempt),
                Err(e) if !e.is_recoverable() => {
                    return Err(translation_error!(
                        translation_api,
                        e.status_code(),
                        e,
                        self.backend.endpoint()
                    ));
                }
                Err(e) => warn!("⚠️  第 {} 次尝试失败: {}", attempt, e),
            }

            if attempt < self.retry.max_attempts {
                let delay = self.retry.delay_after(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        warn!(
            "❌ {} 次尝试均失败，本批 {} 行留空待修复",
            self.retry.max_attempts,
            lines.len()
        );
        Ok(BatchOutcome::SoftFailure(vec![String::new(); lines.len()]))
    }
}

/// 批次划分限制
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchLimits {
    pub max_lines: usize,
    /// 每批原文字符预算（单行超出时独占一批）
    pub max_chars: usize,
}

/// 选出原文非空且译文为空的位置，按限制分批
pub fn plan_batches(originals: &[String], translations: &[String], limits: BatchLimits) -> Vec<Vec<usize>> {
    let max_lines = limits.max_lines.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_chars = 0;

    for (position, original) in originals.iter().enumerate() {
        let pending = translations.get(position).map_or(true, |t| t.trim().is_empty());
        if !pending || original.trim().is_empty() {
            continue;
        }

        let chars = original.chars().count();
        if !current.is_empty()
            && (current.len() >= max_lines || current_chars + chars > limits.max_chars)
        {
            batches.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current.push(position);
        current_chars += chars;
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// 翻译流程统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    pub batches: usize,
    pub soft_failures: usize,
    /// 本次新填入的译文数
    pub translated: usize,
    /// 结束时仍为空的位置数
    pub remaining: usize,
    /// 实际执行的轮数（首轮 + 修复轮）
    pub passes: usize,
    pub cancelled: bool,
}

/// 翻译所有待翻译位置
///
/// 每批完成后调用 `commit` 持久化当前译文；首轮之后最多再做 `repair_passes` 轮，只处理仍为空的位置
pub async fn translate_pending<B, F>(
    aligner: &ChunkAligner<B>,
    originals: &[String],
    translations: &mut Vec<String>,
    limits: BatchLimits,
    repair_passes: usize,
    cancel: &CancelFlag,
    mut commit: F,
) -> Result<PipelineReport>
where
    B: TextBackend,
    F: FnMut(&[String]) -> Result<()>,
{
    translations.resize(originals.len(), String::new());
    let mut report = PipelineReport::default();

    'passes: for pass in 0..=repair_passes {
        let batches = plan_batches(originals, translations, limits);
        if batches.is_empty() {
            break;
        }
        report.passes += 1;
        if pass == 0 {
            info!("🚀 待翻译 {} 批", batches.len());
        } else {
            info!("🔧 第 {} 轮修复: {} 批", pass, batches.len());
        }

        for positions in batches {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break 'passes;
            }

            let lines: Vec<String> = positions.iter().map(|&p| originals[p].clone()).collect();
            match aligner.translate_batch(&lines, cancel).await? {
                BatchOutcome::Cancelled => {
                    report.cancelled = true;
                    break 'passes;
                }
                BatchOutcome::SoftFailure(_) => {
                    report.batches += 1;
                    report.soft_failures += 1;
                }
                BatchOutcome::Translated(results) => {
                    report.batches += 1;
                    for (&position, text) in positions.iter().zip(results) {
                        if !text.is_empty() {
                            translations[position] = text;
                            report.translated += 1;
                        }
                    }
                    commit(translations)?;
                }
            }
        }
    }

    report.remaining = plan_batches(originals, translations, limits)
        .iter()
        .map(Vec::len)
        .sum();
    Ok(report)
}
