mod capture;
mod config;
mod llm;
mod playback;
mod tts;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use mockview_core::capture::{CaptureEvent, SpeechCapture};
use mockview_core::narrator::{AudioSink, Narrator, Voice};
use mockview_core::session::{AnswerRecord, InterviewSession, Phase, SessionPolicy};
use mockview_core::{
    AnalysisFailed, AnswerAnalysis, CaptureBackend, Command, Evaluator, PlaybackError,
    QuestionGenerationFailed, QuestionSource,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum VoiceArg {
    Male,
    Female,
}

impl From<VoiceArg> for Voice {
    fn from(v: VoiceArg) -> Self {
        match v {
            VoiceArg::Male => Voice::Male,
            VoiceArg::Female => Voice::Female,
        }
    }
}

/// Voice-driven mock technical interview in the terminal.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Interview topics. May also be entered interactively at startup.
    topics: Vec<String>,

    /// Interviewer voice.
    #[arg(long, value_enum, default_value = "male")]
    voice: VoiceArg,

    /// Whole-session time budget in minutes.
    #[arg(long)]
    minutes: Option<u64>,

    /// Number of questions to generate.
    #[arg(long)]
    questions: Option<usize>,

    /// Run without microphone or speakers; answers are typed.
    #[arg(long)]
    no_audio: bool,

    /// Input device name, when not using the system default.
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name, when not using the system default.
    #[arg(long)]
    output_device: Option<String>,
}

/// Outcomes of runtime side effects, fed back into the session.
enum Input {
    QuestionsReady(Result<Vec<String>, QuestionGenerationFailed>),
    NarrationDone {
        generation: u64,
        result: Result<(), PlaybackError>,
    },
    EvaluationDone {
        generation: u64,
        result: Result<AnswerAnalysis, AnalysisFailed>,
    },
    Line(String),
}

/// Tracks what has already been printed, so re-renders after every event are
/// idempotent.
struct Ui {
    announced_question: Option<usize>,
    feedback_shown: usize,
}

impl Ui {
    fn new() -> Self {
        Self {
            announced_question: None,
            feedback_shown: 0,
        }
    }

    fn render(&mut self, session: &mut InterviewSession) {
        while let Some(notice) = session.take_notice() {
            println!("! {notice}");
        }
        match session.phase() {
            Phase::Narrating | Phase::Capturing => {
                let index = session.current_index();
                if self.announced_question != Some(index) {
                    self.announced_question = Some(index);
                    let total = session.questions().len();
                    let remaining = session.time_remaining().as_secs();
                    println!();
                    println!(
                        "Question {}/{} ({}:{:02} left): {}",
                        index + 1,
                        total,
                        remaining / 60,
                        remaining % 60,
                        session.current_question().unwrap_or(""),
                    );
                    println!(
                        "Speak your answer, or type it. Enter submits, /skip skips, \
                         /record//stop control the mic, /quit exits."
                    );
                }
            }
            Phase::ShowingFeedback => {
                if session.results().len() > self.feedback_shown {
                    self.feedback_shown = session.results().len();
                    if let Some(record) = session.latest_feedback() {
                        print_feedback(record);
                    }
                    println!("Press Enter for the next question.");
                }
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.announced_question = None;
        self.feedback_shown = 0;
    }
}

fn print_feedback(record: &AnswerRecord) {
    println!();
    println!(
        "Rating: {:.1}/5  Sentiment: {:?}",
        record.quality_rating, record.sentiment
    );
    if !record.talking_points.is_empty() {
        println!("Talking points:");
        for point in &record.talking_points {
            println!("  - {point}");
        }
    }
    println!("{}", record.justification);
}

fn print_summary(session: &InterviewSession, average_rating: f32) {
    println!();
    println!("=== Interview complete ===");
    for record in session.results() {
        let question = session
            .questions()
            .get(record.question_index)
            .map(String::as_str)
            .unwrap_or("");
        if record.is_scored() {
            println!("[{:.1}/5] {question}", record.quality_rating);
        } else {
            println!("[skipped] {question}");
        }
    }
    let scored = session.results().iter().filter(|r| r.is_scored()).count();
    if scored > 0 {
        println!("Average rating: {average_rating:.1}/5 over {scored} answered question(s)");
    } else {
        println!("No questions were answered.");
    }
    println!("Type /restart for another session, or press Enter to exit.");
}

fn parse_topics(line: &str) -> Vec<String> {
    line.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(config.log_level.into()),
        )
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let policy = SessionPolicy {
        time_budget: cli
            .minutes
            .map(|m| Duration::from_secs(m * 60))
            .unwrap_or(config.session_budget),
        question_count: cli.questions.unwrap_or(config.question_count),
        ..SessionPolicy::default()
    };
    let voice = Voice::from(cli.voice);

    let llm = Arc::new(llm::LlmClient::new(
        config.openai_api_key.clone(),
        config.chat_model.clone(),
    ));

    // The cpal streams are not Send, so main holds them for the lifetime of
    // the process; the narrator and capture backend only see channel ends.
    let mut _output_stream = None;
    let sink: Box<dyn AudioSink> = if cli.no_audio {
        Box::new(playback::NullSink)
    } else {
        match playback::build_output(cli.output_device.clone()) {
            Ok((sink, stream)) => {
                _output_stream = Some(stream);
                Box::new(sink)
            }
            Err(e) => {
                tracing::warn!("audio output unavailable, questions will not be narrated: {e:#}");
                Box::new(playback::NullSink)
            }
        }
    };
    let synthesizer = Arc::new(tts::OpenAiSpeech::new(
        config.openai_api_key.clone(),
        config.tts_model.clone(),
    ));
    let narrator = Arc::new(Narrator::new(synthesizer, sink));

    let mut _input_stream = None;
    let backend: Box<dyn CaptureBackend> = if cli.no_audio {
        Box::new(capture::NullCapture::disabled())
    } else {
        match capture::build_input(cli.input_device.clone()) {
            Ok((mic_rx, sample_rate, stream)) => {
                _input_stream = Some(stream);
                let transcriber = capture::OpenAiTranscriber::new(
                    config.openai_api_key.clone(),
                    config.transcribe_model.clone(),
                );
                Box::new(capture::MicCapture::new(
                    mic_rx,
                    sample_rate,
                    Box::new(transcriber),
                ))
            }
            Err(e) => {
                tracing::warn!("microphone unavailable, answers must be typed: {e:#}");
                Box::new(capture::NullCapture::unavailable())
            }
        }
    };
    let (mut capture, mut capture_rx) = SpeechCapture::new(backend);

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(64);
    let (input_tx, mut input_rx) = mpsc::channel::<Input>(64);

    // stdin lines drive every interactive control.
    {
        let input_tx = input_tx.clone();
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if input_tx.send(Input::Line(line)).await.is_err() {
                    break;
                }
            }
        });
    }

    let mut session = InterviewSession::new(policy);
    let mut display = Ui::new();
    // Generation the active capture session was started under; capture events
    // do not carry it themselves.
    let mut capture_generation = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    if cli.topics.is_empty() {
        println!("Enter interview topics, separated by commas:");
    } else {
        session
            .submit_topics(cli.topics.clone(), voice, &cmd_tx)
            .await?;
        println!("Generating questions for: {}", cli.topics.join(", "));
    }

    loop {
        tokio::select! {
            Some(command) = cmd_rx.recv() => {
                match command {
                    Command::FetchQuestions { topics, count } => {
                        let llm = llm.clone();
                        let input_tx = input_tx.clone();
                        tokio::spawn(async move {
                            let result = llm.generate_questions(&topics, count).await;
                            let _ = input_tx.send(Input::QuestionsReady(result)).await;
                        });
                    }
                    Command::Narrate { generation, voice, text } => {
                        let narrator = narrator.clone();
                        let input_tx = input_tx.clone();
                        tokio::spawn(async move {
                            let result = narrator.speak(voice, &text).await;
                            let _ = input_tx
                                .send(Input::NarrationDone { generation, result })
                                .await;
                        });
                    }
                    Command::CancelNarration => {
                        narrator.cancel().await;
                    }
                    Command::StartCapture { generation } => {
                        capture_generation = generation;
                        capture.start().await;
                    }
                    Command::StopCapture => {
                        capture.stop().await;
                    }
                    Command::Evaluate { generation, question, answer } => {
                        println!("Evaluating your answer...");
                        let llm = llm.clone();
                        let input_tx = input_tx.clone();
                        tokio::spawn(async move {
                            let result = llm.evaluate_answer(&question, &answer).await;
                            let _ = input_tx
                                .send(Input::EvaluationDone { generation, result })
                                .await;
                        });
                    }
                    Command::SessionComplete { average_rating } => {
                        print_summary(&session, average_rating);
                    }
                }
            }
            Some(event) = capture_rx.recv() => {
                match event {
                    CaptureEvent::Final { seq, text } => {
                        // Fragments arrive trimmed; re-add the word boundary.
                        session.final_fragment(capture_generation, seq, &format!("{text} "));
                        println!("  [heard] {text}");
                    }
                    CaptureEvent::Interim { text } => {
                        session.interim_fragment(capture_generation, &text);
                    }
                    CaptureEvent::Ended => {
                        tracing::debug!("capture session ended");
                        session.capture_ended(capture_generation);
                    }
                    CaptureEvent::Error(e) => {
                        session.capture_error(capture_generation, e);
                        display.render(&mut session);
                    }
                }
            }
            Some(input) = input_rx.recv() => {
                match input {
                    Input::QuestionsReady(result) => {
                        session.questions_ready(result, &cmd_tx).await?;
                        display.render(&mut session);
                    }
                    Input::NarrationDone { generation, result } => {
                        session.narration_finished(generation, result, &cmd_tx).await?;
                        display.render(&mut session);
                    }
                    Input::EvaluationDone { generation, result } => {
                        session.evaluation_finished(generation, result, &cmd_tx).await?;
                        display.render(&mut session);
                    }
                    Input::Line(line) => {
                        let line = line.trim().to_string();
                        if line == "/quit" {
                            break;
                        }
                        match session.phase() {
                            Phase::AwaitingTopics => {
                                let topics = parse_topics(&line);
                                if topics.is_empty() {
                                    println!("Enter at least one topic:");
                                } else {
                                    println!("Generating questions for: {}", topics.join(", "));
                                    session.submit_topics(topics, voice, &cmd_tx).await?;
                                }
                            }
                            Phase::Narrating | Phase::Capturing | Phase::Evaluating
                                if line == "/skip" =>
                            {
                                session.skip(&cmd_tx).await?;
                                display.render(&mut session);
                            }
                            Phase::Capturing => {
                                match line.as_str() {
                                    "" | "/submit" => {
                                        session.submit_answer(&cmd_tx).await?;
                                    }
                                    // Manual microphone control, for restarting
                                    // after an error or pausing mid-answer.
                                    "/record" => capture.start().await,
                                    "/stop" => capture.stop().await,
                                    _ => session.append_manual(&line),
                                }
                                display.render(&mut session);
                            }
                            Phase::ShowingFeedback => {
                                session.advance(&cmd_tx).await?;
                                display.render(&mut session);
                            }
                            Phase::Complete => {
                                if line == "/restart" {
                                    session.restart();
                                    display.reset();
                                    println!("Enter interview topics, separated by commas:");
                                } else {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
            _ = ticker.tick() => {
                session.tick(&cmd_tx).await?;
                display.render(&mut session);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
        }
    }

    capture.stop().await;
    narrator.cancel().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_split_on_commas_and_trimmed() {
        assert_eq!(
            parse_topics(" docker , kubernetes ,, rust "),
            vec!["docker", "kubernetes", "rust"]
        );
        assert!(parse_topics("  ,  ").is_empty());
    }

    #[test]
    fn cli_voice_maps_onto_session_voice() {
        assert_eq!(Voice::from(VoiceArg::Male), Voice::Male);
        assert_eq!(Voice::from(VoiceArg::Female), Voice::Female);
    }
}
