use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use oj_judge::config::{CliArgs, Command, Config};
use oj_judge::judge::{Judge, JudgeSettings};
use oj_judge::language::LanguageRegistry;
use oj_judge::models::SubmissionId;
use oj_judge::queue::JudgeQueue;
use oj_judge::sandbox::create_sandbox;
use oj_judge::scoring::ScoringEngine;
use oj_judge::store::{self, SqliteStore, Stores};
use oj_judge::worker::{poll_pending, worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        database: database_config,
        judge: judge_config,
        scoring: scoring_config,
        languages: language_config,
    } = cli.to_config().context("Failed to load configuration")?;

    if judge_config.workers == 0 {
        bail!("The number of workers must not be 0");
    }

    let db_path = match database_config.path {
        Some(path) => path,
        None => store::get_db_path()?,
    };
    if cli.flush_data {
        store::remove_db(&db_path);
    }
    let stores = Stores::from_backend(Arc::new(SqliteStore::open(&db_path).await?));
    let scoring = Arc::new(ScoringEngine::new(
        stores.clone(),
        scoring_config.penalty_per_attempt,
    ));

    if let Command::Standings { contest_id } = cli.command {
        let standings = scoring.standings(contest_id).await?;
        println!("{}", serde_json::to_string_pretty(&standings)?);
        return Ok(());
    }

    let languages = Arc::new(LanguageRegistry::from_config(&language_config));
    log::info!("Languages: {}", languages.names().join(", "));
    let sandbox = create_sandbox(&judge_config.sandbox)?;
    let judge = Arc::new(Judge::new(
        stores.clone(),
        languages,
        sandbox,
        JudgeSettings::from_config(&judge_config),
    ));
    let shutdown_token = CancellationToken::new();

    match cli.command {
        Command::Judge { submission_id } => {
            judge_once(submission_id, &judge, &scoring, &stores, &shutdown_token).await
        }
        Command::Serve { poll_interval } => {
            serve(
                judge_config.workers,
                Duration::from_secs(poll_interval.max(1)),
                judge,
                scoring,
                stores,
                shutdown_token,
            )
            .await
        }
        Command::Standings { .. } => Ok(()),
    }
}

async fn judge_once(
    submission_id: SubmissionId,
    judge: &Judge,
    scoring: &ScoringEngine,
    stores: &Stores,
    shutdown_token: &CancellationToken,
) -> anyhow::Result<()> {
    let judging = judge.judge(submission_id, shutdown_token);
    tokio::pin!(judging);
    let report = tokio::select! {
        report = &mut judging => report,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, cancelling submission {submission_id}");
            shutdown_token.cancel();
            judging.await
        }
    };

    // A faulted attempt still changes the standing
    if let Some(submission) = stores.submissions.get(submission_id).await? {
        scoring
            .recompute(submission.contest_id, submission.user_id)
            .await?;
    }

    let report = report?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn serve(
    workers: u8,
    poll_interval: Duration,
    judge: Arc<Judge>,
    scoring: Arc<ScoringEngine>,
    stores: Stores,
    shutdown_token: CancellationToken,
) -> anyhow::Result<()> {
    let queue = Arc::new(JudgeQueue::new());

    let mut tasks = JoinSet::new();
    for i in 1..=workers {
        tasks.spawn(worker(
            i,
            judge.clone(),
            scoring.clone(),
            stores.clone(),
            queue.clone(),
            shutdown_token.clone(),
        ));
    }
    tasks.spawn(poll_pending(
        stores,
        queue,
        poll_interval,
        shutdown_token.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        Some(res) = tasks.join_next() => {
            log::error!("A task terminated unexpectedly: {:?}", res);
        }
    }

    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Err(e)) => log::error!("Worker finished with error: {e:#}"),
            Err(e) if e.is_panic() => log::error!("Worker handle panicked: {:?}", e),
            Err(e) => log::error!("Worker handle finished with error: {:?}", e),
            Ok(Ok(())) => {}
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
