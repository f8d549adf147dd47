use colored::*;
use std::future::Future;
use std::io;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::assembler::{assemble, AssemblyOptions, AssemblyOutcome, AssemblyTask};
use crate::error::AssemblyError;
use crate::unit::{Unit, UnitKind};

/// Tally of one scheduler run. Individual failures have already been logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub assembled: usize,
    pub already_assembled: usize,
    pub empty: usize,
    pub failed: usize,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.assembled + self.already_assembled + self.empty + self.failed
    }

    fn record(&mut self, result: &Result<AssemblyOutcome, AssemblyError>) {
        match result {
            Ok(AssemblyOutcome::Assembled { .. }) => self.assembled += 1,
            Ok(AssemblyOutcome::AlreadyAssembled) => self.already_assembled += 1,
            Ok(AssemblyOutcome::Empty) => self.empty += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Assembles every sub-unit of a list of resolved units under `root`.
pub struct Scheduler<'a> {
    units: &'a [Unit],
    root: PathBuf,
    concurrency: NonZeroUsize,
    options: AssemblyOptions,
}

impl<'a> Scheduler<'a> {
    /// `concurrency` defaults to the number of available CPU cores.
    pub fn new(
        units: &'a [Unit],
        root: impl Into<PathBuf>,
        concurrency: Option<NonZeroUsize>,
    ) -> Self {
        let concurrency = concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
        });

        Self {
            units,
            root: root.into(),
            concurrency,
            options: AssemblyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AssemblyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.get()
    }

    /// One task per book chapter, one per preview or page, none for
    /// unresolved units. Tasks are returned in unit order.
    pub fn plan(&self) -> Vec<AssemblyTask> {
        let mut tasks = Vec::new();

        for unit in self.units {
            match unit.kind() {
                UnitKind::Book => {
                    let book_dir = self.root.join(&unit.display_name);
                    for sub_unit in &unit.sub_units {
                        tasks.push(
                            AssemblyTask::new(book_dir.join(&sub_unit.name), sub_unit.name.clone())
                                .with_expected_pages(sub_unit.page_count),
                        );
                    }
                }
                UnitKind::Preview | UnitKind::Page => {
                    let Some(sub_unit) = unit.sub_units.first() else {
                        error!(
                            "{} link \"{}\" has no sub-unit, skipping",
                            unit.kind(),
                            unit.source_link
                        );
                        continue;
                    };
                    tasks.push(
                        AssemblyTask::new(self.root.join(&sub_unit.name), sub_unit.name.clone())
                            .with_expected_pages(sub_unit.page_count),
                    );
                }
                UnitKind::Unresolved => {
                    debug!("Skipping unresolved link \"{}\"", unit.source_link);
                }
            }
        }

        tasks
    }

    /// Runs every planned task with at most `concurrency` in flight and
    /// returns once all of them have finished. Task failures never abort the
    /// run; they are logged and counted.
    pub async fn run(&self) -> RunReport {
        self.run_with(|task, options| async move { assemble(&task, &options).await })
            .await
    }

    async fn run_with<F, Fut>(&self, worker: F) -> RunReport
    where
        F: Fn(AssemblyTask, AssemblyOptions) -> Fut,
        Fut: Future<Output = Result<AssemblyOutcome, AssemblyError>> + Send + 'static,
    {
        let tasks = self.plan();
        let limit = self.concurrency.get();
        info!(
            "Assembling {} PDFs under \"{}\" with {} workers",
            tasks.len(),
            self.root.display().to_string().green(),
            limit
        );

        let mut pending = tasks.into_iter();
        let mut join_set = JoinSet::new();
        let mut report = RunReport::default();

        loop {
            while join_set.len() < limit {
                let Some(task) = pending.next() else {
                    break;
                };
                join_set.spawn(worker(task, self.options.clone()));
            }
            debug_assert!(join_set.len() <= limit);

            let Some(joined) = join_set.join_next().await else {
                break;
            };

            match joined {
                Ok(result) => report.record(&result),
                Err(e) => {
                    error!("{}", format!("Assembly task aborted: {}", e).red());
                    report.failed += 1;
                }
            }
        }

        info!(
            "Assembly finished: {} written, {} already assembled, {} empty, {} failed",
            report.assembled, report.already_assembled, report.empty, report.failed
        );
        report
    }

    /// Blocking variant of [`Scheduler::run`] that owns its own runtime.
    ///
    /// Fails only if the runtime cannot be built. Must not be called from
    /// inside an async context.
    pub fn run_blocking(&self) -> io::Result<RunReport> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.concurrency.get())
            .enable_all()
            .build()?;

        Ok(runtime.block_on(self.run()))
    }
}
