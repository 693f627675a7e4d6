// src/analysis/engine.rs — Transcript analysis: preprocessing, model calls, scoring

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use futures::future::try_join_all;
use regex::Regex;
use serde_json::Value;

use super::parser;
use super::prompts::{PromptLibrary, ScoreLine};
use super::types::{expected_overall, AnalysisResult, AnalysisType, Category};
use crate::domain::AnalysisStatus;
use crate::infra::config::AnalysisConfig;
use crate::infra::errors::DeskError;
use crate::provider::{ChatRequest, Message, ModelProvider, TokenUsage};

/// Characters of transcript a quick analysis looks at.
pub const QUICK_WINDOW_CHARS: usize = 2000;

const PHONE_MASK: &str = "[電話番号]";
const EMAIL_MASK: &str = "[メールアドレス]";
const TRUNCATION_MARK: &str = "...[以下省略]";

fn phone_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{2,4}-\d{2,4}-\d{4}").expect("phone pattern"))
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S+@\S+\.\S+").expect("email pattern"))
}

/// Trim, mask phone numbers and e-mail addresses, cap at `max_chars`.
pub fn preprocess(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let masked = phone_pattern().replace_all(trimmed, PHONE_MASK);
    let masked = email_pattern().replace_all(&masked, EMAIL_MASK).into_owned();
    if masked.chars().count() > max_chars {
        let mut cut: String = masked.chars().take(max_chars).collect();
        cut.push_str(TRUNCATION_MARK);
        tracing::warn!(max_chars, "Transcript truncated for analysis");
        cut
    } else {
        masked
    }
}

pub fn estimate_cost(tokens: u32, per_1k: f64) -> f64 {
    (tokens as f64 / 1000.0 * per_1k * 1_000_000.0).round() / 1_000_000.0
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub analysis_type: AnalysisType,
    pub focus_areas: Vec<Category>,
    /// Category name -> prompt replacing the built-in template.
    pub custom_prompts: BTreeMap<String, String>,
}

impl AnalysisRequest {
    /// Categories sent to the model, in a stable order without duplicates.
    pub fn categories(&self) -> Result<Vec<Category>, DeskError> {
        match self.analysis_type {
            AnalysisType::Full | AnalysisType::Quick => Ok(Category::ALL.to_vec()),
            AnalysisType::Specific => {
                let picked: Vec<Category> = Category::ALL
                    .into_iter()
                    .filter(|c| self.focus_areas.contains(c))
                    .collect();
                if picked.is_empty() {
                    return Err(DeskError::Validation(
                        "specific analysis needs at least one focus area".into(),
                    ));
                }
                Ok(picked)
            }
        }
    }
}

/// Result under construction plus the tokens spent on it so far.
#[derive(Debug, Clone)]
pub struct Draft {
    pub result: AnalysisResult,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub result: AnalysisResult,
    pub tokens: u32,
    pub cost: f64,
}

fn empty_result(categories: Vec<Category>) -> AnalysisResult {
    AnalysisResult {
        overall_score: 0.0,
        questioning: Default::default(),
        anxiety_handling: Default::default(),
        closing: Default::default(),
        flow: Default::default(),
        analyzed_categories: categories,
        session_summary: String::new(),
        key_strengths: Vec::new(),
        critical_improvements: Vec::new(),
        analyzed_at: Utc::now(),
    }
}

fn apply_category(result: &mut AnalysisResult, category: Category, reply: &Value) {
    match category {
        Category::Questioning => result.questioning = parser::questioning(reply),
        Category::AnxietyHandling => result.anxiety_handling = parser::anxiety_handling(reply),
        Category::Closing => result.closing = parser::closing(reply),
        Category::Flow => result.flow = parser::flow(reply),
    }
}

fn improvements_of(result: &AnalysisResult, category: Category) -> &[String] {
    match category {
        Category::Questioning => &result.questioning.improvements,
        Category::AnxietyHandling => &result.anxiety_handling.improvements,
        Category::Closing => &result.closing.improvements,
        Category::Flow => &result.flow.improvements,
    }
}

pub struct Analyzer {
    provider: Arc<dyn ModelProvider>,
    prompts: PromptLibrary,
    config: AnalysisConfig,
}

impl Analyzer {
    pub fn new(provider: Arc<dyn ModelProvider>, prompts: PromptLibrary, config: AnalysisConfig) -> Self {
        Self {
            provider,
            prompts,
            config,
        }
    }

    pub fn preprocess(&self, transcript: &str) -> String {
        preprocess(transcript, self.config.max_input_chars)
    }

    async fn ask(&self, prompt: String) -> Result<(Value, TokenUsage), DeskError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![Message::user(prompt)],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            system: Some(self.prompts.system()?),
            json_mode: true,
        };
        let response = self.provider.chat(request).await?;
        let value = parser::parse_json_response(&response.content)?;
        Ok((value, response.usage))
    }

    /// Score every requested category. Full and specific analyses make one
    /// concurrent call per category; quick makes a single call. Any failed
    /// call fails the whole run.
    pub async fn score_categories(&self, text: &str, request: &AnalysisRequest) -> Result<Draft, DeskError> {
        let categories = request.categories()?;
        let mut draft = Draft {
            result: empty_result(categories.clone()),
            usage: TokenUsage::default(),
        };

        if request.analysis_type == AnalysisType::Quick {
            let window: String = text.chars().take(QUICK_WINDOW_CHARS).collect();
            let (reply, usage) = self.ask(self.prompts.quick(&window)?).await?;
            draft.usage.add(&usage);
            let r = &mut draft.result;
            r.questioning.score = parser::quick_score(&reply, Category::Questioning);
            r.anxiety_handling.score = parser::quick_score(&reply, Category::AnxietyHandling);
            r.closing.score = parser::quick_score(&reply, Category::Closing);
            r.flow.score = parser::quick_score(&reply, Category::Flow);
            r.session_summary = reply
                .get("session_summary")
                .and_then(Value::as_str)
                .unwrap_or("クイック分析")
                .to_string();
            r.critical_improvements = parser::strings(&reply, "key_improvements");
            return Ok(draft);
        }

        let calls = categories.iter().map(|&category| {
            let custom = request.custom_prompts.get(category.as_str()).map(String::as_str);
            async move {
                let prompt = self.prompts.category(category, text, custom)?;
                let (reply, usage) = self.ask(prompt).await?;
                Ok::<_, DeskError>((category, reply, usage))
            }
        });
        for (category, reply, usage) in try_join_all(calls).await? {
            apply_category(&mut draft.result, category, &reply);
            draft.usage.add(&usage);
        }

        if request.analysis_type == AnalysisType::Specific {
            let names: Vec<&str> = categories.iter().map(Category::as_str).collect();
            draft.result.session_summary = format!("特定項目分析: {}", names.join(", "));
            draft.result.critical_improvements = categories
                .iter()
                .flat_map(|c| improvements_of(&draft.result, *c).iter().take(2).cloned())
                .collect();
        }
        Ok(draft)
    }

    /// Session summary, strengths and key improvements for a full analysis.
    /// A failed call leaves a fallback built from the category results.
    pub async fn summarize(&self, text: &str, draft: &mut Draft) {
        let scores: Vec<ScoreLine> = Category::ALL
            .iter()
            .map(|c| ScoreLine {
                name: c.as_str(),
                score: draft.result.score_of(*c),
            })
            .collect();
        let outcome = match self.prompts.comprehensive(text, &scores) {
            Ok(prompt) => self.ask(prompt).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok((reply, usage)) => {
                draft.usage.add(&usage);
                draft.result.session_summary = reply
                    .get("session_summary")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                draft.result.key_strengths = parser::strings(&reply, "key_strengths");
                draft.result.critical_improvements = parser::strings(&reply, "critical_improvements");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Summary generation failed, using fallback");
                draft.result.session_summary = "要約を生成できませんでした".into();
                draft.result.key_strengths = Vec::new();
                draft.result.critical_improvements = Category::ALL
                    .iter()
                    .filter_map(|c| improvements_of(&draft.result, *c).first().cloned())
                    .collect();
            }
        }
    }

    /// Stamp the overall score and cost.
    pub fn finish(&self, draft: Draft, kind: AnalysisType) -> AnalysisOutput {
        let mut result = draft.result;
        result.overall_score = expected_overall(&result, kind);
        result.analyzed_at = Utc::now();
        let tokens = draft.usage.total();
        AnalysisOutput {
            result,
            tokens,
            cost: estimate_cost(tokens, self.config.cost_per_1k_tokens),
        }
    }

    /// Preprocess, score and summarize. `on_stage` hears each stage before it
    /// starts; an error from it aborts the run.
    pub async fn analyze<F, Fut>(
        &self,
        transcript: &str,
        request: &AnalysisRequest,
        mut on_stage: F,
    ) -> Result<AnalysisOutput, DeskError>
    where
        F: FnMut(AnalysisStatus) -> Fut,
        Fut: Future<Output = Result<(), DeskError>>,
    {
        let text = self.preprocess(transcript);
        if text.is_empty() {
            return Err(DeskError::Validation("transcript is empty after preprocessing".into()));
        }
        on_stage(AnalysisStatus::Analyzing).await?;
        let mut draft = self.score_categories(&text, request).await?;
        if request.analysis_type == AnalysisType::Full {
            on_stage(AnalysisStatus::GeneratingSuggestions).await?;
            self.summarize(&text, &mut draft).await;
        }
        Ok(self.finish(draft, request.analysis_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatResponse, StopReason};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers by prompt content; records every prompt it sees.
    struct Scripted {
        seen: Mutex<Vec<String>>,
        fail_summary: bool,
    }

    impl Scripted {
        fn new(fail_summary: bool) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail_summary,
            })
        }
    }

    #[async_trait]
    impl ModelProvider for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, DeskError> {
            let prompt = request.messages[0].content.clone();
            self.seen.lock().unwrap().push(prompt.clone());
            let content = if prompt.contains("session_summary\": \"200") {
                if self.fail_summary {
                    return Err(DeskError::Provider {
                        provider: "scripted".into(),
                        message: "boom".into(),
                        retriable: false,
                    });
                }
                r#"{"session_summary": "丁寧な説明", "key_strengths": ["共感"], "critical_improvements": ["価格説明"]}"#
            } else if prompt.contains("questioning_score") {
                r#"{"questioning_score": 7, "anxiety_handling_score": 8, "closing_score": 6, "flow_score": 9, "key_improvements": ["x"]}"#
            } else if prompt.contains("open_question_ratio") {
                r#"{"score": 8, "improvements": ["q1"]}"#
            } else if prompt.contains("empathy_expressions") {
                r#"{"score": 6, "improvements": ["a1"]}"#
            } else if prompt.contains("contract_probability") {
                "```json\n{\"score\": 7, \"improvements\": [\"c1\"],}\n```"
            } else {
                r#"{"score": 9}"#
            };
            Ok(ChatResponse {
                content: content.into(),
                usage: TokenUsage {
                    input_tokens: 100,
                    output_tokens: 25,
                },
                stop_reason: StopReason::EndTurn,
            })
        }
    }

    fn analyzer(provider: Arc<Scripted>) -> Analyzer {
        Analyzer::new(provider, PromptLibrary::builtin(), AnalysisConfig::default())
    }

    async fn run(analyzer: &Analyzer, transcript: &str, req: &AnalysisRequest) -> Result<AnalysisOutput, DeskError> {
        analyzer.analyze(transcript, req, |_| async { Ok(()) }).await
    }

    #[test]
    fn test_preprocess_masks_and_truncates() {
        let out = preprocess("  連絡先は 090-1234-5678 と taro@example.com です  ", 8000);
        assert_eq!(out, "連絡先は [電話番号] と [メールアドレス] です");
        let long = "あ".repeat(10);
        assert_eq!(preprocess(&long, 4), format!("ああああ{TRUNCATION_MARK}"));
    }

    #[test]
    fn test_cost() {
        assert_eq!(estimate_cost(1000, 0.045), 0.045);
        assert_eq!(estimate_cost(2500, 0.045), 0.1125);
    }

    #[test]
    fn test_specific_requires_focus() {
        let req = AnalysisRequest {
            analysis_type: AnalysisType::Specific,
            focus_areas: vec![Category::Flow, Category::Questioning, Category::Flow],
            ..Default::default()
        };
        assert_eq!(req.categories().unwrap(), vec![Category::Questioning, Category::Flow]);
        let empty = AnalysisRequest {
            analysis_type: AnalysisType::Specific,
            ..Default::default()
        };
        assert!(empty.categories().is_err());
    }

    #[tokio::test]
    async fn test_full_analysis_weighted_overall() {
        let provider = Scripted::new(false);
        let mut stages = Vec::new();
        let out = analyzer(provider.clone())
            .analyze(
                "カウンセラー: 本日はどのようなご相談ですか？",
                &AnalysisRequest::default(),
                |stage| {
                    stages.push(stage);
                    async { Ok(()) }
                },
            )
            .await
            .unwrap();
        assert_eq!(
            stages,
            vec![AnalysisStatus::Analyzing, AnalysisStatus::GeneratingSuggestions]
        );
        // 8*0.25 + 6*0.25 + 7*0.30 + 9*0.20
        assert_eq!(out.result.overall_score, 7.4);
        assert_eq!(out.result.closing.improvements, vec!["c1".to_string()]);
        assert_eq!(out.result.session_summary, "丁寧な説明");
        assert_eq!(out.tokens, 5 * 125);
        assert_eq!(provider.seen.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_summary_failure_falls_back() {
        let out = run(&analyzer(Scripted::new(true)), "text", &AnalysisRequest::default())
            .await
            .unwrap();
        assert_eq!(out.result.overall_score, 7.4);
        assert_eq!(out.result.critical_improvements, vec!["q1", "a1", "c1"]);
        assert_eq!(out.tokens, 4 * 125);
    }

    #[tokio::test]
    async fn test_quick_uses_mean_and_one_call() {
        let provider = Scripted::new(false);
        let req = AnalysisRequest {
            analysis_type: AnalysisType::Quick,
            ..Default::default()
        };
        let out = run(&analyzer(provider.clone()), "text", &req).await.unwrap();
        assert_eq!(out.result.overall_score, 7.5);
        assert_eq!(provider.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_specific_with_custom_prompt() {
        let provider = Scripted::new(false);
        let mut custom = BTreeMap::new();
        custom.insert("flow".to_string(), "Judge the flow: {{ transcript }}".to_string());
        let req = AnalysisRequest {
            analysis_type: AnalysisType::Specific,
            focus_areas: vec![Category::Questioning, Category::Flow],
            custom_prompts: custom,
        };
        let out = run(&analyzer(provider.clone()), "hello", &req).await.unwrap();
        // mean of 8 and 9
        assert_eq!(out.result.overall_score, 8.5);
        assert_eq!(out.result.analyzed_categories, vec![Category::Questioning, Category::Flow]);
        assert!(provider.seen.lock().unwrap().iter().any(|p| p == "Judge the flow: hello"));
    }

    #[tokio::test]
    async fn test_empty_transcript_rejected() {
        let err = run(&analyzer(Scripted::new(false)), "   ", &AnalysisRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::Validation(_)));
    }
}
