//! Runner tying configuration, graph construction and execution together

use crate::cli::args::Args;
use crate::command::{CommandRunner, ProcessRunner};
use crate::config::MirrorConfig;
use crate::error::{ConfigError, PipelineError};
use crate::logging::Logger;
use crate::pipeline::{Collaborators, ImageStatus, PipelineExecutor, PipelineGraph, PipelineReport, PipelineRun};
use std::sync::Arc;
use tracing::debug;

/// Exit code for configuration and graph errors
pub const EXIT_USAGE: i32 = 2;

pub struct Runner {
    args: Args,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        // JSON goes to stdout on its own, so console output is suppressed
        let output = if args.quiet || args.json_output() {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };

        Self { args, output }
    }

    /// Run with real docker and gcloud processes and return the process exit code
    pub async fn run(&self) -> i32 {
        let config = match self.load_config() {
            Ok(config) => config,
            Err(e) => {
                self.output.error(&e.to_string());
                return EXIT_USAGE;
            }
        };

        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
        let collaborators = Collaborators {
            provisioner: Arc::new(config.provisioner(Arc::clone(&runner))),
            extractor: Arc::new(config.extractor()),
            session: config.session(),
            runner,
        };
        self.run_with(&config, collaborators).await
    }

    /// Run against the given collaborators
    pub async fn run_with(&self, config: &MirrorConfig, collaborators: Collaborators) -> i32 {
        self.output.section("Image Mirror");

        let run = match self.build_run(config) {
            Ok(run) => run,
            Err(e) => {
                self.output.error(&e.to_string());
                return EXIT_USAGE;
            }
        };

        if self.args.dry_run {
            return match run.describe() {
                Ok(lines) => {
                    if self.args.json_output() {
                        println!("{}", serde_json::json!({ "run_id": run.id.to_string(), "nodes": lines }));
                    } else {
                        self.output.list("Planned operations", &lines);
                        self.output.info("Dry run mode - nothing was executed");
                    }
                    0
                }
                Err(e) => {
                    self.output.error(&e.to_string());
                    EXIT_USAGE
                }
            };
        }

        let executor = PipelineExecutor::new(collaborators, self.output.clone())
            .with_retry(config.retry.clone())
            .with_max_concurrent(config.concurrency);

        self.output.subsection("Running pipeline");
        let report = match executor.execute(run).await {
            Ok(report) => report,
            Err(e) => {
                self.output.error(&e.to_string());
                return EXIT_USAGE;
            }
        };

        self.print_report(&report);
        report.exit_code()
    }

    fn load_config(&self) -> Result<MirrorConfig, ConfigError> {
        self.args.validate()?;
        self.args.resolve_config()
    }

    fn build_run(&self, config: &MirrorConfig) -> Result<PipelineRun, PipelineError> {
        let mode = config.release_mode();
        let destination = config.destination();
        let source = config.source_endpoint();

        self.output.summary_kv(
            "Configuration",
            &[
                ("Version", config.version.clone()),
                ("Release mode", mode.to_string()),
                ("Source", source.to_string()),
                ("Destination", destination.repository_path.clone()),
                ("Images", config.images.len().to_string()),
                ("Concurrency", config.concurrency.to_string()),
            ],
        );

        let graph = PipelineGraph::new(config.mirror_settings());
        let run = graph.build(&config.image_refs(), &mode, &destination, &source)?;
        debug!(run_id = %run.id, nodes = run.len(), "pipeline graph built");
        Ok(run)
    }

    fn print_report(&self, report: &PipelineReport) {
        if self.args.json_output() {
            match serde_json::to_string_pretty(&report.to_json()) {
                Ok(json) => println!("{}", json),
                Err(e) => self.output.error(&format!("Failed to render report: {}", e)),
            }
            return;
        }

        if let Some(cause) = &report.abort {
            self.output.error(&format!("Run aborted: {}", cause));
        }

        let lines: Vec<String> = report
            .images
            .iter()
            .map(|image| match &image.error {
                Some(error) => format!("{} {}: {}", image.status, image.destination, error),
                None => format!("{} {}", image.status, image.destination),
            })
            .collect();
        self.output.list("Images", &lines);

        let pushed = report.count(ImageStatus::Pushed);
        let summary = format!(
            "{}/{} images pushed in {}",
            pushed,
            report.images.len(),
            self.output.format_duration(self.output.elapsed())
        );
        if report.is_success() {
            self.output.success(&summary);
        } else {
            self.output.warning(&summary);
        }

        // The destination references are the result; print them even when quiet
        if self.output.quiet {
            for image in report.images.iter().filter(|image| image.status == ImageStatus::Pushed) {
                println!("{}", image.destination);
            }
        }
    }
}
