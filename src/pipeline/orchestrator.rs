//! The four-stage permit pipeline.
//!
//! coordinator -> regulation finder -> risk analyst -> admin. The
//! coordinator may end the run early with a clarifying question.

use crate::cli::OutputFormat;
use crate::llm::{LlmClient, Prompt, PromptLibrary};
use crate::models::{default_checklist, Decision, Permit, PermitMetadata, RegulationDoc, RiskRecord};
use crate::report;
use crate::retrieval::{format_context, RegulationFinder};
use crate::risk::{assessment_summary, extract_risk_record};
use crate::session::Session;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Reply prefix the coordinator uses when information is missing.
const MISSING_PREFIX: &str = "MISSING";

/// Asked when the coordinator flags missing information without a question.
pub const DEFAULT_QUESTION: &str =
    "Please describe the planned work in more detail: what will be done, and where?";

/// Exit code for an issued permit (approved or conditional).
pub const EXIT_ISSUED: i32 = 0;
/// Exit code for a rejected permit.
pub const EXIT_REJECTED: i32 = 2;
/// Exit code when the coordinator asked a clarifying question.
pub const EXIT_NEEDS_INFO: i32 = 3;

/// Context shown to the admin stage when no assessment could be made.
const UNASSESSED_SUMMARY: &str =
    "The risk assessment data could not be extracted. The request is treated as high risk.";

/// Progress notifications, one per stage.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The coordinator judged the request complete.
    IntentConfirmed,
    /// The coordinator asked for more information.
    ClarificationNeeded { question: String },
    /// Regulation excerpts were retrieved.
    RegulationsRetrieved { documents: Vec<RegulationDoc> },
    /// The risk analyst finished; `None` when no score could be extracted.
    RiskAssessed { risk: Option<RiskRecord> },
    /// The permit document was produced.
    PermitIssued {
        decision: Decision,
        document_path: Option<PathBuf>,
    },
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// The request was incomplete; ask the user this question.
    NeedsMoreInfo { question: String },
    /// A permit was issued (approved, conditional or rejected).
    Issued {
        permit: Permit,
        /// Short message for the user.
        message: String,
        /// Where the document was written, `None` if writing failed.
        document_path: Option<PathBuf>,
    },
}

impl PipelineOutcome {
    /// The text to show the user and record in the session.
    pub fn reply(&self) -> &str {
        match self {
            PipelineOutcome::NeedsMoreInfo { question } => question,
            PipelineOutcome::Issued { message, .. } => message,
        }
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineOutcome::NeedsMoreInfo { .. } => EXIT_NEEDS_INFO,
            PipelineOutcome::Issued { permit, .. } if permit.decision == Decision::Rejected => {
                EXIT_REJECTED
            }
            PipelineOutcome::Issued { .. } => EXIT_ISSUED,
        }
    }

    /// Carry a one-shot request over to the next invocation.
    ///
    /// A clarifying question keeps the exchange so the answer is read with
    /// the original request; an issued permit starts the next request fresh.
    pub fn update_session(&self, user_input: &str, session: &mut Session) {
        match self {
            PipelineOutcome::Issued { .. } => session.clear(),
            PipelineOutcome::NeedsMoreInfo { question } => {
                session.push_user(user_input);
                session.push_assistant(question.clone());
            }
        }
    }
}

/// Where and how permit documents are written.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub output_dir: PathBuf,
    pub format: OutputFormat,
}

/// Runs requests through the four stages.
pub struct PermitPipeline {
    llm: Arc<dyn LlmClient>,
    finder: RegulationFinder,
    prompts: PromptLibrary,
    output: OutputSettings,
}

impl PermitPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        finder: RegulationFinder,
        prompts: PromptLibrary,
        output: OutputSettings,
    ) -> Self {
        Self {
            llm,
            finder,
            prompts,
            output,
        }
    }

    /// Process one user input against the session history.
    ///
    /// The session is read only; recording the exchange is up to the caller.
    pub async fn run(
        &self,
        user_input: &str,
        session: &Session,
        on_event: &mut dyn FnMut(&PipelineEvent),
    ) -> Result<PipelineOutcome> {
        let start_time = Instant::now();
        let history = session.chat_history();
        let user_input = user_input.trim();

        // Stage 1: coordinator
        if let Some(question) = self.coordinate(&history, user_input).await? {
            info!("Coordinator requested more information");
            on_event(&PipelineEvent::ClarificationNeeded {
                question: question.clone(),
            });
            return Ok(PipelineOutcome::NeedsMoreInfo { question });
        }
        on_event(&PipelineEvent::IntentConfirmed);

        // Stage 2: regulation finder
        let regulations = self
            .finder
            .find(user_input)
            .await
            .context("Regulation search failed")?;
        let context = format_context(&regulations);
        on_event(&PipelineEvent::RegulationsRetrieved {
            documents: regulations.clone(),
        });

        // Stage 3: risk analyst
        let risk = self.assess(&history, user_input, &context).await?;
        on_event(&PipelineEvent::RiskAssessed { risk: risk.clone() });

        // Stage 4: admin
        let mut permit = self
            .draft_permit(&history, user_input, &context, risk, regulations)
            .await?;
        permit.metadata.duration_seconds = start_time.elapsed().as_secs_f64();

        let document_path =
            match report::write_permit(&permit, &self.output.output_dir, self.output.format) {
                Ok(path) => {
                    info!("Permit document saved to {}", path.display());
                    Some(path)
                }
                Err(e) => {
                    error!("Failed to write permit document: {:#}", e);
                    None
                }
            };

        let message = outcome_message(&permit);
        on_event(&PipelineEvent::PermitIssued {
            decision: permit.decision,
            document_path: document_path.clone(),
        });

        Ok(PipelineOutcome::Issued {
            permit,
            message,
            document_path,
        })
    }

    async fn ask(&self, prompt: &str) -> Result<String> {
        debug!("Prompt ({} chars) sent to {}", prompt.len(), self.llm.model_name());
        let reply = self.llm.complete(prompt).await?;
        debug!("Reply: {}", reply);
        Ok(reply)
    }

    /// Returns the clarifying question when the request is incomplete.
    async fn coordinate(&self, history: &str, user_input: &str) -> Result<Option<String>> {
        let prompt = self.prompts.render(
            Prompt::Coordinator,
            &[("chat_history", history), ("user_input", user_input)],
        );
        let reply = self
            .ask(&prompt)
            .await
            .context("Coordinator request failed")?;

        Ok(parse_coordinator_reply(&reply))
    }

    async fn assess(
        &self,
        history: &str,
        user_input: &str,
        context: &str,
    ) -> Result<Option<RiskRecord>> {
        let prompt = self.prompts.render(
            Prompt::RiskAnalyst,
            &[
                ("chat_history", history),
                ("user_input", user_input),
                ("context", context),
            ],
        );
        let reply = self
            .ask(&prompt)
            .await
            .context("Risk analyst request failed")?;

        match extract_risk_record(&reply) {
            Ok(record) => {
                info!(
                    "Risk assessed: R = {} ({}), hazard: {}",
                    record.display_score(),
                    record.band,
                    record.hazard_type
                );
                Ok(Some(record))
            }
            Err(e) => {
                warn!("{}. The request will be rejected.", e);
                Ok(None)
            }
        }
    }

    async fn draft_permit(
        &self,
        history: &str,
        user_input: &str,
        context: &str,
        risk: Option<RiskRecord>,
        regulations: Vec<RegulationDoc>,
    ) -> Result<Permit> {
        let summary_prompt = self.prompts.render(
            Prompt::WorkSummary,
            &[("history", history), ("last_input", user_input)],
        );
        let reply = self
            .ask(&summary_prompt)
            .await
            .context("Work summary request failed")?;
        let work_summary = match clean_summary(&reply) {
            summary if summary.is_empty() => user_input.to_string(),
            summary => summary,
        };
        info!("Consolidated work: {}", work_summary);

        let assessment = risk
            .as_ref()
            .map(assessment_summary)
            .unwrap_or_else(|| UNASSESSED_SUMMARY.to_string());
        let admin_context = format!("{}\n\n{}", context, assessment);
        let admin_prompt = self.prompts.render(
            Prompt::AdminAgent,
            &[("user_input", &work_summary), ("context", &admin_context)],
        );
        let analysis = self
            .ask(&admin_prompt)
            .await
            .context("Admin analysis request failed")?;

        Ok(Permit {
            metadata: PermitMetadata::new(Utc::now(), self.llm.model_name()),
            decision: Decision::from_risk(risk.as_ref()),
            work_summary,
            risk,
            analysis: analysis.trim().to_string(),
            regulations,
            checklist: default_checklist(),
        })
    }
}

/// `None` when the request is complete, else the question to ask.
pub fn parse_coordinator_reply(reply: &str) -> Option<String> {
    let reply = reply.trim();
    let rest = reply.strip_prefix(MISSING_PREFIX)?;

    let question = rest.trim_start().trim_start_matches(':').trim();
    if question.is_empty() {
        Some(DEFAULT_QUESTION.to_string())
    } else {
        Some(question.to_string())
    }
}

fn clean_summary(reply: &str) -> String {
    reply.replace('"', "").trim().to_string()
}

/// Short outcome message shown to the user.
pub fn outcome_message(permit: &Permit) -> String {
    let score = permit.display_score();
    match permit.decision {
        Decision::Rejected => format!(
            "🚨 **Rejected ({} / {})** Review the permit document for the detailed reasons.",
            permit.band_label(),
            score
        ),
        Decision::Conditional => format!(
            "⚠️ **Conditional approval ({} / {})** Work may proceed once the safety measures are in place.",
            permit.band_label(),
            score
        ),
        Decision::Approved => format!(
            "✅ **Approved ({} / {})** Work permit issued.",
            permit.band_label(),
            score
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::retrieval::{Retriever, NO_REGULATIONS_FOUND};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Answers prompts from a script, in order, and records them.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Connect("script exhausted".to_string()))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct FixedRetriever(Vec<RegulationDoc>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn retrieve(&self, _query: &str) -> Result<Vec<RegulationDoc>> {
            Ok(self.0.clone())
        }
    }

    fn pipeline(llm: Arc<ScriptedLlm>, docs: Vec<RegulationDoc>, out: &TempDir) -> PermitPipeline {
        let finder = RegulationFinder::new(Arc::new(FixedRetriever(docs)), "S-Chem", 2, 8);
        PermitPipeline::new(
            llm,
            finder,
            PromptLibrary::new(None),
            OutputSettings {
                output_dir: out.path().join("outputs"),
                format: OutputFormat::Markdown,
            },
        )
    }

    fn hot_work_doc() -> RegulationDoc {
        RegulationDoc::new(
            "data/s-chem_hot_work.md",
            "Hot work requires a gas test and a fire watch.",
            0.9,
        )
    }

    async fn run(pipeline: &PermitPipeline, input: &str) -> (PipelineOutcome, Vec<PipelineEvent>) {
        let mut events = Vec::new();
        let outcome = pipeline
            .run(input, &Session::new(), &mut |e: &PipelineEvent| {
                events.push(e.clone())
            })
            .await
            .unwrap();
        (outcome, events)
    }

    #[test]
    fn test_parse_coordinator_reply() {
        assert_eq!(parse_coordinator_reply("OK"), None);
        assert_eq!(parse_coordinator_reply("  ok, complete"), None);
        assert_eq!(
            parse_coordinator_reply("MISSING: Where will the welding take place?\n"),
            Some("Where will the welding take place?".to_string())
        );
        assert_eq!(
            parse_coordinator_reply("MISSING:"),
            Some(DEFAULT_QUESTION.to_string())
        );
    }

    #[tokio::test]
    async fn test_clarification_ends_run() {
        let llm = ScriptedLlm::new(&["MISSING: Which equipment will you weld on?"]);
        let out = TempDir::new().unwrap();
        let pipeline = pipeline(llm.clone(), vec![hot_work_doc()], &out);

        let (outcome, events) = run(&pipeline, "Welding").await;

        assert_eq!(outcome.reply(), "Which equipment will you weld on?");
        assert!(matches!(outcome, PipelineOutcome::NeedsMoreInfo { .. }));
        assert_eq!(events.len(), 1);
        assert_eq!(llm.prompts().len(), 1);
        assert!(!out.path().join("outputs").exists());
    }

    #[tokio::test]
    async fn test_high_risk_is_rejected() {
        let llm = ScriptedLlm::new(&[
            "OK",
            "P: 3\nE: 6\nC: 15\nR: 270\nHazard type: Fire/explosion",
            "\"Welding on the T-3 tank roof nozzle\"",
            "Residual vapour may ignite. Gas test required.",
        ]);
        let out = TempDir::new().unwrap();
        let pipeline = pipeline(llm.clone(), vec![hot_work_doc()], &out);

        let (outcome, events) = run(&pipeline, "Welding on the T-3 tank roof").await;

        let PipelineOutcome::Issued {
            permit,
            message,
            document_path,
        } = outcome
        else {
            panic!("expected an issued permit");
        };
        assert_eq!(permit.decision, Decision::Rejected);
        assert_eq!(permit.work_summary, "Welding on the T-3 tank roof nozzle");
        assert_eq!(
            message,
            "🚨 **Rejected (High / 270)** Review the permit document for the detailed reasons."
        );

        let path = document_path.unwrap();
        let document = std::fs::read_to_string(path).unwrap();
        assert!(document.contains("Work Permit Rejection Notice"));
        assert!(document.contains("Gas test required."));

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], PipelineEvent::IntentConfirmed);

        // The admin stage sees both the regulations and the assessment.
        let prompts = llm.prompts();
        assert!(prompts[1].contains("📄 [Source: s-chem_hot_work.md]"));
        assert!(prompts[3].contains("Welding on the T-3 tank roof nozzle"));
        assert!(prompts[3].contains("Hot work requires a gas test"));
        assert!(prompts[3].contains("Final risk (R):** **270**"));
    }

    #[tokio::test]
    async fn test_medium_and_low_risk_messages() {
        let out = TempDir::new().unwrap();

        let llm = ScriptedLlm::new(&["OK", "P: 1\nE: 6\nC: 15", "Grinding a flange", "Use a spark shield."]);
        let (outcome, _) = run(&pipeline(llm, vec![], &out), "Grinding a flange in unit 2").await;
        assert_eq!(
            outcome.reply(),
            "⚠️ **Conditional approval (Medium / 90)** Work may proceed once the safety measures are in place."
        );

        let llm = ScriptedLlm::new(&["OK", "P: 0.5\nE: 2\nC: 7", "Replacing a gauge", "Low risk."]);
        let (outcome, _) = run(&pipeline(llm, vec![], &out), "Replacing a gauge").await;
        assert_eq!(outcome.reply(), "✅ **Approved (Low / 7)** Work permit issued.");
    }

    #[tokio::test]
    async fn test_unparseable_assessment_fails_closed() {
        let llm = ScriptedLlm::new(&["OK", "I cannot assess this.", "", "No analysis."]);
        let out = TempDir::new().unwrap();
        let pipeline = pipeline(llm.clone(), vec![], &out);

        let (outcome, events) = run(&pipeline, "Entering the T-5 tank").await;

        let PipelineOutcome::Issued { permit, message, .. } = outcome else {
            panic!("expected an issued permit");
        };
        assert!(permit.risk.is_none());
        assert_eq!(permit.decision, Decision::Rejected);
        // Empty summary falls back to the raw input.
        assert_eq!(permit.work_summary, "Entering the T-5 tank");
        assert!(message.starts_with("🚨 **Rejected (Unassessed / 0)**"));
        assert!(events.contains(&PipelineEvent::RiskAssessed { risk: None }));

        let prompts = llm.prompts();
        assert!(prompts[1].contains(NO_REGULATIONS_FOUND));
        assert!(prompts[3].contains(UNASSESSED_SUMMARY));
    }

    #[tokio::test]
    async fn test_write_failure_keeps_outcome() {
        let llm = ScriptedLlm::new(&["OK", "P: 0.5\nE: 2\nC: 7", "Replacing a gauge", "Fine."]);
        let out = TempDir::new().unwrap();
        // A file where the output directory should be.
        let blocker = out.path().join("outputs");
        std::fs::write(&blocker, "not a directory").unwrap();
        let pipeline = pipeline(llm, vec![], &out);

        let (outcome, _) = run(&pipeline, "Replacing a gauge").await;

        let PipelineOutcome::Issued { document_path, .. } = outcome else {
            panic!("expected an issued permit");
        };
        assert!(document_path.is_none());
    }

    #[tokio::test]
    async fn test_history_reaches_prompts() {
        let llm = ScriptedLlm::new(&["MISSING: Where?"]);
        let out = TempDir::new().unwrap();
        let pipeline = pipeline(llm.clone(), vec![], &out);

        let mut session = Session::new();
        session.push_user("Welding");
        session.push_assistant("Which equipment?");

        pipeline
            .run("The T-3 tank roof", &session, &mut |_: &PipelineEvent| {})
            .await
            .unwrap();

        let prompts = llm.prompts();
        assert!(prompts[0].contains("user: Welding\nassistant: Which equipment?"));
        assert!(prompts[0].contains("The T-3 tank roof"));
    }

    fn issued(risk: Option<RiskRecord>) -> PipelineOutcome {
        let permit = Permit {
            metadata: PermitMetadata::new(Utc::now(), "scripted"),
            decision: Decision::from_risk(risk.as_ref()),
            work_summary: "Welding on the T-3 tank roof".to_string(),
            risk,
            analysis: String::new(),
            regulations: Vec::new(),
            checklist: default_checklist(),
        };
        let message = outcome_message(&permit);
        PipelineOutcome::Issued {
            permit,
            message,
            document_path: None,
        }
    }

    #[test]
    fn test_exit_codes() {
        let question = PipelineOutcome::NeedsMoreInfo {
            question: "Where?".to_string(),
        };
        assert_eq!(question.exit_code(), EXIT_NEEDS_INFO);

        let approved = issued(Some(RiskRecord::compute(0.5, 2.0, 7.0, "Cut")));
        assert_eq!(approved.exit_code(), EXIT_ISSUED);

        let conditional = issued(Some(RiskRecord::compute(1.0, 6.0, 15.0, "Burn")));
        assert_eq!(conditional.exit_code(), EXIT_ISSUED);

        let rejected = issued(Some(RiskRecord::compute(3.0, 6.0, 15.0, "Fire")));
        assert_eq!(rejected.exit_code(), EXIT_REJECTED);

        assert_eq!(issued(None).exit_code(), EXIT_REJECTED);
    }

    #[test]
    fn test_session_carries_question_until_issued() {
        let mut session = Session::new();

        let question = PipelineOutcome::NeedsMoreInfo {
            question: "Which equipment?".to_string(),
        };
        question.update_session("Welding", &mut session);
        assert_eq!(session.chat_history(), "user: Welding\nassistant: Which equipment?");

        let again = PipelineOutcome::NeedsMoreInfo {
            question: "Which unit?".to_string(),
        };
        again.update_session("On a tank", &mut session);
        assert_eq!(session.messages.len(), 4);

        issued(Some(RiskRecord::compute(3.0, 6.0, 15.0, "Fire"))).update_session("T-3", &mut session);
        assert!(session.is_empty());

        // Approved and conditional permits end the conversation as well.
        question.update_session("Welding", &mut session);
        issued(Some(RiskRecord::compute(0.5, 2.0, 7.0, "Cut"))).update_session("T-3", &mut session);
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_llm_failure_is_an_error() {
        let llm = ScriptedLlm::new(&[]);
        let out = TempDir::new().unwrap();
        let pipeline = pipeline(llm, vec![], &out);

        let result = pipeline
            .run("Welding", &Session::new(), &mut |_: &PipelineEvent| {})
            .await;
        assert!(result.is_err());
    }
}
