//! Subcommand implementations.

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use enrichment::{
    CreateJobRequest, EnrichmentError, EnrichmentJob, EnrichmentJobClient,
    EnrichmentProgressEvent, JobStatus, ProcessorTier, ProgressCallbacks,
};

pub async fn processors(client: &EnrichmentJobClient, json: bool) -> Result<()> {
    let catalog = client.list_processors().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }
    for info in catalog {
        println!(
            "{:<6} {:<6} {}  (best for: {})",
            info.name, info.relative_cost, info.description, info.recommended_for
        );
    }
    Ok(())
}

pub async fn create(
    client: &EnrichmentJobClient,
    export_id: String,
    column: String,
    prompt: String,
    processor: Option<ProcessorTier>,
    follow: bool,
) -> Result<()> {
    let mut request = CreateJobRequest::new(export_id, column, prompt);
    if let Some(tier) = processor {
        request = request.with_processor(tier);
    }

    let job = client.create_job(request).await?;
    print_job(&job);
    if follow {
        return stream(client, &job.id).await;
    }
    Ok(())
}

pub async fn get(client: &EnrichmentJobClient, job_id: &str, json: bool) -> Result<()> {
    let job = client.get_job(job_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        print_job(&job);
    }
    Ok(())
}

pub async fn cancel(client: &EnrichmentJobClient, job_id: &str) -> Result<()> {
    client.cancel_job(job_id).await?;
    println!("Cancellation requested for job {}", job_id);
    Ok(())
}

pub async fn jobs(
    client: &EnrichmentJobClient,
    export_id: &str,
    watch: bool,
    json: bool,
) -> Result<()> {
    if !watch {
        let jobs = client.list_export_jobs(export_id).await?;
        print_jobs(&jobs, json)?;
        return Ok(());
    }

    let mut panel = client.watch_export_jobs(export_id);
    loop {
        tokio::select! {
            jobs = panel.changed() => match jobs {
                Some(jobs) => {
                    print_jobs(&jobs, json)?;
                    if let Some(err) = panel.last_error() {
                        log::warn!("Last refresh failed: {}", err);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    panel.stop();
    Ok(())
}

pub async fn watch(client: &EnrichmentJobClient, job_id: &str) -> Result<()> {
    let mut watch = client.watch_job(job_id);
    let mut last = watch.latest();
    if let Some(job) = &last {
        print_job(job);
    }

    while let Some(job) = watch.changed().await {
        print_job(&job);
        last = Some(job);
    }

    match last {
        Some(job) if job.is_terminal() => finish(&job),
        _ => match watch.last_error() {
            Some(err) => bail!(err),
            None => bail!("Stopped watching job {} before it finished", job_id),
        },
    }
}

enum StreamEnd {
    Complete,
    Lost(EnrichmentError),
}

pub async fn stream(client: &EnrichmentJobClient, job_id: &str) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let error_tx = tx.clone();

    let listener = ProgressCallbacks::new(|event: &EnrichmentProgressEvent| {
        let mut line = format!(
            "{:<9} {}/{} rows ({:.1}%)",
            event.status.as_str(),
            event.completed_rows,
            event.total_rows,
            event.progress()
        );
        if let (Some(row), Some(answer)) = (&event.current_row_id, event.answer()) {
            if let Some(text) = answer.answer {
                line.push_str(&format!("  [{}] {}", row, text));
            }
        }
        println!("{}", line);
    })
    .on_error(move |err| {
        let _ = error_tx.send(StreamEnd::Lost(err));
    })
    .on_complete(move || {
        let _ = tx.send(StreamEnd::Complete);
    });

    let subscription = client.stream_job_progress(job_id, listener);
    let end = rx.recv().await;
    subscription.dispose();

    match end {
        Some(StreamEnd::Complete) => {
            let job = client.get_job(job_id).await?;
            finish(&job)
        }
        Some(StreamEnd::Lost(err)) => {
            log::warn!("{}; falling back to polling", err);
            watch(client, job_id).await
        }
        None => watch(client, job_id).await,
    }
}

fn finish(job: &EnrichmentJob) -> Result<()> {
    match job.status {
        JobStatus::Completed => {
            println!(
                "Job {} completed: {} rows enriched, {} failed",
                job.id, job.completed_rows, job.failed_rows
            );
            Ok(())
        }
        JobStatus::Cancelled => {
            println!("Job {} was cancelled", job.id);
            Ok(())
        }
        _ => bail!(
            "Job {} {}: {}",
            job.id,
            job.status,
            job.error_message.as_deref().unwrap_or("no error message")
        ),
    }
}

fn print_job(job: &EnrichmentJob) {
    let tier = job.processor.as_deref().unwrap_or("-");
    println!(
        "{}  {:<9} {:>5.1}%  {}/{} rows  {:<5}  {}",
        job.id,
        job.status.as_str(),
        job.progress(),
        job.completed_rows,
        job.total_rows,
        tier,
        job.column_name
    );
    if let Some(err) = &job.error_message {
        println!("    error: {}", err);
    }
}

fn print_jobs(jobs: &[EnrichmentJob], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(jobs)?);
        return Ok(());
    }
    if jobs.is_empty() {
        println!("No enrichment jobs");
    }
    for job in jobs {
        print_job(job);
    }
    Ok(())
}
