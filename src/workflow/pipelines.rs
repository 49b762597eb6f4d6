// Pipeline variants - video upload, unified reasoning, short generation
use std::sync::Arc;
use std::time::Duration;

use super::error::{codes, GraphError};
use super::graph::{InvokeNode, MapNode, Node, PassNode, PipelineGraph, PipelineGraphBuilder, PollJobNode, RetryPolicy};
use super::path::ResultPath;
use super::router::{conditions, ChoiceBuilder, Condition};
use super::state::{Parameters, ValueSource};
use crate::config::{PipelineConfig, UploadPipeline};
use crate::jobs::poller::PollSettings;
use crate::models::Stage;
use crate::workers::HighlightsWorker;

pub const VIDEO_UPLOAD: &str = "video-upload";
pub const UNIFIED_REASONING: &str = "unified-reasoning";
pub const GENERATE_SHORT: &str = "generate-short";

/// Context path holding the run id on the upload pipelines
pub const RUN_ID_PATH: &str = "$.uuid";

/// Every pipeline variant, built once at startup
#[derive(Debug, Clone)]
pub struct PipelineSet {
    pub video_upload: Arc<PipelineGraph>,
    pub unified: Arc<PipelineGraph>,
    pub short: Arc<PipelineGraph>,
    pub upload: UploadPipeline,
}

impl PipelineSet {
    pub fn build(config: &PipelineConfig, upload: UploadPipeline) -> Result<Self, GraphError> {
        Ok(Self {
            video_upload: Arc::new(video_upload(config)?),
            unified: Arc::new(unified_reasoning(config)?),
            short: Arc::new(generate_short(config)?),
            upload,
        })
    }

    /// Graph started by upload-completion events
    pub fn for_upload(&self) -> Arc<PipelineGraph> {
        match self.upload {
            UploadPipeline::Classic => self.video_upload.clone(),
            UploadPipeline::Unified => self.unified.clone(),
        }
    }
}

fn worker_retry() -> RetryPolicy {
    RetryPolicy::exponential(2, Duration::from_secs(2), 2.0)
}

/// `uuid` and `raw_file_uri` from the upload trigger fields
fn prepare_parameters(next: &str) -> PassNode {
    PassNode::new(next).with_parameters(
        Parameters::new()
            .field("uuid", ValueSource::split_part("$.objectKey", "/", -2))
            .field(
                "raw_file_uri",
                ValueSource::format("s3://{}/{}", &["$.bucketName", "$.objectKey"]),
            ),
    )
}

fn transcription_settings(config: &PipelineConfig) -> PollSettings {
    PollSettings::new(config.poll_interval, config.transcription_max_polls)
}

fn render_settings(config: &PipelineConfig) -> PollSettings {
    PollSettings::new(config.poll_interval, config.render_max_polls)
}

/// Render one highlight, then re-transcribe the full-HD clip.
/// `index_path` points at the highlight index inside the branch context.
fn render_and_transcribe(
    builder: PipelineGraphBuilder,
    config: &PipelineConfig,
    index_path: &str,
    timeframes_path: &str,
    done: &str,
) -> PipelineGraphBuilder {
    builder
        .node(
            "RenderHighlight",
            PollJobNode::new(
                &config.render_service,
                ValueSource::job_name(RUN_ID_PATH, "render", Some(index_path)),
                "PrepareFHD",
            )
            .with_media(
                ValueSource::path("$.raw_file_uri"),
                ValueSource::format("s3://{}/{}/HIGHLIGHT_{}.mp4", &["$.bucketName", RUN_ID_PATH, index_path]),
            )
            .with_options(Parameters::new().copy("timeframes", timeframes_path))
            .with_settings(render_settings(config))
            .with_retry(worker_retry())
            .with_result_path(ResultPath::at("$.render")),
        )
        .node(
            "PrepareFHD",
            PassNode::new("TranscribeHighlight")
                .with_parameters(Parameters::new().field(
                    "fhd_uri",
                    ValueSource::format("s3://{}/{}/FHD/{}.mp4", &["$.bucketName", RUN_ID_PATH, index_path]),
                ))
                .with_result_path(ResultPath::at("$.fhd")),
        )
        .node(
            "TranscribeHighlight",
            PollJobNode::new(
                &config.transcription_service,
                ValueSource::job_name(RUN_ID_PATH, "FHD", Some(index_path)),
                done,
            )
            .with_media(ValueSource::path("$.fhd.fhd_uri"), ValueSource::path("$.bucketName"))
            .with_settings(transcription_settings(config))
            .with_retry(worker_retry())
            .with_result_path(ResultPath::at("$.highlightTranscript")),
        )
}

/// Classic upload pipeline: transcription job, topic extraction, per-topic
/// processing, then per-highlight timeframe extraction and rendering
pub fn video_upload(config: &PipelineConfig) -> Result<PipelineGraph, GraphError> {
    let process_topic = PipelineGraphBuilder::new("process-topic")
        .node(
            "ProcessTopic",
            InvokeNode::new("ProcessTopic", "Done")
                .with_payload(
                    Parameters::new()
                        .copy("uuid", RUN_ID_PATH)
                        .copy("topic", "$.item")
                        .copy("index", "$.itemIndex"),
                )
                .with_retry(worker_retry()),
        )
        .node("Done", Node::Succeed)
        .start_at("ProcessTopic")
        .build()?;

    let extract_highlight = render_and_transcribe(
        PipelineGraphBuilder::new("highlight-extract"),
        config,
        "$.item.index",
        "$.timeframe.timeframes",
        "Done",
    )
    .node(
        "ExtractTimeframe",
        InvokeNode::new("ExtractTimeframe", "CheckTimeframe")
            .with_payload(
                Parameters::new()
                    .copy("uuid", RUN_ID_PATH)
                    .copy("index", "$.item.index")
                    .copy("text", "$.item.text"),
            )
            .with_retry(worker_retry())
            .with_result_path(ResultPath::at("$.timeframe"))
            .catching(&[codes::ALL], "ExtractionFailed", ResultPath::at("$.error")),
    )
    .node(
        "CheckTimeframe",
        ChoiceBuilder::new()
            .when(conditions::worker_ok("$.timeframe"), "RenderHighlight")
            .otherwise("ExtractionFailed")
            .build(),
    )
    .node("ExtractionFailed", PassNode::new("Done"))
    .node("Done", Node::Succeed)
    .start_at("ExtractTimeframe")
    .build()?;

    PipelineGraphBuilder::new(VIDEO_UPLOAD)
        .node("PrepareParameters", prepare_parameters("TranscribeVideo"))
        .node(
            "TranscribeVideo",
            PollJobNode::new(
                &config.transcription_service,
                ValueSource::job_name(RUN_ID_PATH, "stepFunction", None),
                "Transcribed",
            )
            .with_media(ValueSource::path("$.raw_file_uri"), ValueSource::path("$.bucketName"))
            .with_settings(transcription_settings(config))
            .with_retry(worker_retry())
            .with_result_path(ResultPath::at("$.transcription")),
        )
        .node("Transcribed", Node::checkpoint(Stage::Transcribed, "ExtractTopics"))
        .node(
            "ExtractTopics",
            InvokeNode::new("ExtractTopics", "CheckTopics")
                .with_payload(
                    Parameters::new()
                        .copy("uuid", RUN_ID_PATH)
                        .copy("bucket_name", "$.bucketName")
                        .copy("transcript", "$.transcription.result"),
                )
                .with_retry(worker_retry())
                .with_result_path(ResultPath::at("$.topics")),
        )
        .node(
            "CheckTopics",
            ChoiceBuilder::new()
                .when(conditions::worker_ok("$.topics"), "ProcessTopics")
                .otherwise("TopicsFailed")
                .build(),
        )
        .node(
            "ProcessTopics",
            MapNode::new("$.topics.topics", process_topic, "HighlightsExtracted")
                .with_max_concurrency(config.map_max_concurrency),
        )
        .node("HighlightsExtracted", Node::checkpoint(Stage::HighlightsExtracted, "LoadHighlights"))
        .node(
            "LoadHighlights",
            InvokeNode::new(HighlightsWorker::NAME, "HighlightExtract")
                .with_payload(Parameters::new().copy("uuid", RUN_ID_PATH))
                .with_retry(worker_retry())
                .with_result_path(ResultPath::at("$.stored")),
        )
        .node(
            "HighlightExtract",
            MapNode::new("$.stored.highlights", extract_highlight, "Rendered")
                .with_max_concurrency(config.map_max_concurrency)
                .with_branch_output("$.render")
                .with_result_path(ResultPath::at("$.renders")),
        )
        .node("Rendered", Node::checkpoint(Stage::Complete, "Done"))
        .node("TopicsFailed", Node::fail("ExtractTopicsFailed", "topic extraction did not return 200"))
        .node("Done", Node::Succeed)
        .start_at("PrepareParameters")
        .tracks_run(RUN_ID_PATH)
        .build()
}

/// Unified pipeline: subtitles or an explicit transcription loop, optional
/// shot detection, one reasoning call producing every highlight, then
/// per-highlight rendering
pub fn unified_reasoning(config: &PipelineConfig) -> Result<PipelineGraph, GraphError> {
    let process_highlight = render_and_transcribe(
        PipelineGraphBuilder::new("highlight-process"),
        config,
        "$.highlight.index",
        "$.highlight.timeframes",
        "Done",
    )
    .node(
        "ParseTimeframes",
        PassNode::new("RenderHighlight")
            .with_parameters(
                Parameters::new()
                    .copy("index", "$.itemIndex")
                    .copy("timeframes", "$.item.timeframes"),
            )
            .with_result_path(ResultPath::at("$.highlight")),
    )
    .node("Done", Node::Succeed)
    .start_at("ParseTimeframes")
    .build()?;

    let transcription_job = || {
        Parameters::new().field(
            "jobName",
            ValueSource::job_name(RUN_ID_PATH, "stepFunction", None),
        )
    };

    PipelineGraphBuilder::new(UNIFIED_REASONING)
        .node("PrepareParameters", prepare_parameters("CheckSubtitles"))
        .node(
            "CheckSubtitles",
            InvokeNode::new("CheckSubtitles", "SubtitlesFound")
                .with_payload(
                    Parameters::new()
                        .copy("uuid", RUN_ID_PATH)
                        .copy("bucket_name", "$.bucketName"),
                )
                .with_result_path(ResultPath::at("$.subtitles"))
                .catching(&[codes::ALL], "StartTranscriptionJob", ResultPath::at("$.subtitlesError")),
        )
        .node(
            "SubtitlesFound",
            ChoiceBuilder::new()
                .when(conditions::worker_ok("$.subtitles"), "Transcribed")
                .otherwise("StartTranscriptionJob")
                .build(),
        )
        .node(
            "StartTranscriptionJob",
            InvokeNode::new("StartTranscriptionJob", "WaitForTranscription")
                .with_payload(
                    transcription_job()
                        .copy("mediaUri", "$.raw_file_uri")
                        .copy("outputBucket", "$.bucketName"),
                )
                .with_retry(RetryPolicy::fixed(3, Duration::from_secs(2))),
        )
        .node("WaitForTranscription", Node::wait(config.transcription_wait, "GetTranscriptionJob"))
        .node(
            "GetTranscriptionJob",
            InvokeNode::new("GetTranscriptionJob", "TranscriptionStatus")
                .with_payload(transcription_job())
                .with_retry(worker_retry())
                .with_result_path(ResultPath::at("$.transcriptionJob")),
        )
        .node(
            "TranscriptionStatus",
            ChoiceBuilder::new()
                .when(
                    conditions::status_is("$.transcriptionJob.TranscriptionJobStatus", "COMPLETED"),
                    "Transcribed",
                )
                .when(
                    conditions::status_is("$.transcriptionJob.TranscriptionJobStatus", "FAILED"),
                    "TranscriptionFailed",
                )
                .otherwise("WaitForTranscription")
                .build(),
        )
        .node("Transcribed", Node::checkpoint(Stage::Transcribed, "ShouldDetectShots"))
        .node(
            "ShouldDetectShots",
            ChoiceBuilder::new()
                .when(Condition::boolean_equals("$.detectShots", true), "DetectShots")
                .otherwise("CheckModelId")
                .build(),
        )
        .node(
            "DetectShots",
            PollJobNode::new(
                &config.shot_detection_service,
                ValueSource::job_name(RUN_ID_PATH, "shots", None),
                "CheckModelId",
            )
            .with_media(ValueSource::path("$.raw_file_uri"), ValueSource::path("$.bucketName"))
            .with_settings(transcription_settings(config))
            .with_retry(worker_retry())
            .with_result_path(ResultPath::at("$.shots")),
        )
        .node(
            "CheckModelId",
            ChoiceBuilder::new()
                .when(Condition::string_matches("$.modelId", "*anthropic.claude*"), "UnifiedReasoning")
                .when(Condition::string_matches("$.modelId", "*amazon.nova*"), "UnifiedReasoning")
                .otherwise("UnsupportedModel")
                .build(),
        )
        .node(
            "UnifiedReasoning",
            InvokeNode::new("UnifiedReasoning", "CheckReasoning")
                .with_payload(
                    Parameters::new()
                        .copy("uuid", RUN_ID_PATH)
                        .copy("bucket_name", "$.bucketName")
                        .copy("modelId", "$.modelId")
                        .copy("theme", "$.theme")
                        .copy("numberOfVideos", "$.numberOfVideos")
                        .copy("videoLength", "$.videoLength"),
                )
                .with_retry(RetryPolicy::exponential(2, Duration::from_secs(5), 2.0))
                .with_result_path(ResultPath::at("$.reasoning")),
        )
        .node(
            "CheckReasoning",
            ChoiceBuilder::new()
                .when(conditions::worker_ok("$.reasoning"), "HighlightsExtracted")
                .otherwise("ReasoningFailed")
                .build(),
        )
        .node("HighlightsExtracted", Node::checkpoint(Stage::HighlightsExtracted, "HighlightProcess"))
        .node(
            "HighlightProcess",
            MapNode::new("$.reasoning.highlights", process_highlight, "Rendered")
                .with_max_concurrency(config.map_max_concurrency)
                .with_branch_output("$.render")
                .with_result_path(ResultPath::at("$.renders")),
        )
        .node("Rendered", Node::checkpoint(Stage::Complete, "Done"))
        .node("TranscriptionFailed", Node::fail("TranscriptionJobFailed", "transcription job reported FAILED"))
        .node("UnsupportedModel", Node::fail("UnsupportedModel", "model id is not routed to a reasoning worker"))
        .node("ReasoningFailed", Node::fail("ReasoningFailed", "unified reasoning did not return 200"))
        .node("Done", Node::Succeed)
        .start_at("PrepareParameters")
        .tracks_run(RUN_ID_PATH)
        .build()
}

/// Short generation for one highlight: background, render template, final render job
pub fn generate_short(config: &PipelineConfig) -> Result<PipelineGraph, GraphError> {
    PipelineGraphBuilder::new(GENERATE_SHORT)
        .node(
            "PrepareParameters",
            PassNode::new("CreateBackground").with_parameters(
                Parameters::new()
                    .field("inputs", ValueSource::ParseJson("$.inputs".into()))
                    .field("bucketName", ValueSource::literal(config.bucket_name.as_str())),
            ),
        )
        .node(
            "CreateBackground",
            InvokeNode::new("CreateBackground", "MediaConvertTemplate")
                .with_payload(
                    Parameters::new()
                        .copy("videoId", "$.videoId")
                        .copy("highlight", "$.highlight")
                        .copy("question", "$.question")
                        .copy("inputs", "$.inputs"),
                )
                .with_retry(worker_retry())
                .with_result_path(ResultPath::at("$.background")),
        )
        .node(
            "MediaConvertTemplate",
            InvokeNode::new("MediaConvertTemplate", "RenderShort")
                .with_payload(
                    Parameters::new()
                        .copy("videoId", "$.videoId")
                        .copy("highlight", "$.highlight")
                        .copy("inputs", "$.inputs")
                        .copy("background", "$.background"),
                )
                .with_result_selector(Parameters::new().field("template", ValueSource::ParseJson("$.body".into())))
                .with_retry(worker_retry())
                .with_result_path(ResultPath::at("$.template")),
        )
        .node(
            "RenderShort",
            PollJobNode::new(
                &config.render_service,
                ValueSource::job_name("$.videoId", "short", Some("$.highlight")),
                "Done",
            )
            .with_media(
                ValueSource::format("s3://{}/{}/FHD/{}.mp4", &["$.bucketName", "$.videoId", "$.highlight"]),
                ValueSource::format("s3://{}/{}/SHORTS/", &["$.bucketName", "$.videoId"]),
            )
            .with_options(Parameters::new().copy("template", "$.template.template"))
            .with_settings(render_settings(config))
            .with_retry(worker_retry())
            .with_result_path(ResultPath::at("$.short")),
        )
        .node("Done", Node::Succeed)
        .start_at("PrepareParameters")
        .build()
}
