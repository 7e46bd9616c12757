//! Steps 9-10: monitoring and backup jobs in root's crontab.
//!
//! Each managed line carries a trailing `# <service>:<job>` tag. Merging
//! replaces a tagged line in place, appends it when absent and never touches
//! untagged lines.

use anyhow::{bail, Result};
use tracing::info;

use crate::config::types::{DeploySettings, ServiceIdentity};
use crate::success;
use crate::system::executor::CommandRunner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub tag: String,
    pub schedule: String,
    pub command: String,
    pub log_sink: String,
}

impl ScheduledJob {
    pub fn line(&self) -> String {
        format!("{} {} >> {} 2>&1 # {}", self.schedule, self.command, self.log_sink, self.tag)
    }

    fn owns(&self, line: &str) -> bool {
        line.trim_end().ends_with(&format!("# {}", self.tag))
    }
}

/// The monitor sweep and the backup run, both through the installed binary.
pub fn jobs_for(identity: &ServiceIdentity, deploy: &DeploySettings) -> Vec<ScheduledJob> {
    let binary = deploy.ctl_binary.display().to_string();
    let job = |name: &str, schedule: &str| ScheduledJob {
        tag: format!("{}:{}", identity.service_name, name),
        schedule: schedule.to_string(),
        command: format!("{} {}", binary, name),
        log_sink: identity.log_dir.join(format!("{}.log", name)).display().to_string(),
    };
    vec![job("monitor", &deploy.monitor_schedule), job("backup", &deploy.backup_schedule)]
}

/// Merge `jobs` into an existing crontab body.
pub fn merge_crontab(existing: &str, jobs: &[ScheduledJob]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut placed = vec![false; jobs.len()];

    for line in existing.lines() {
        match jobs.iter().position(|j| j.owns(line)) {
            Some(i) if placed[i] => {}
            Some(i) => {
                lines.push(jobs[i].line());
                placed[i] = true;
            }
            None => lines.push(line.to_string()),
        }
    }
    for (job, done) in jobs.iter().zip(&placed) {
        if !done {
            lines.push(job.line());
        }
    }

    let mut merged = lines.join("\n");
    merged.push('\n');
    merged
}

fn read_crontab(runner: &dyn CommandRunner) -> Result<String> {
    let output = runner.run("crontab", &["-l"])?;
    if output.success() {
        return Ok(output.stdout);
    }
    // "no crontab for root" is an empty table
    if output.stderr.contains("no crontab") {
        return Ok(String::new());
    }
    bail!("crontab -l failed: {}", output.stderr.trim())
}

pub fn ensure_jobs(runner: &dyn CommandRunner, jobs: &[ScheduledJob]) -> Result<bool> {
    let existing = read_crontab(runner)?;
    let merged = merge_crontab(&existing, jobs);
    if merged == existing {
        info!("Scheduled jobs already installed");
        return Ok(false);
    }

    let output = runner.run_with_input("crontab", &["-"], &merged)?;
    if !output.success() {
        bail!("crontab - failed: {}", output.stderr.trim());
    }
    for job in jobs {
        success!("Scheduled job installed: {}", job.line());
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::fake::FakeHost;

    fn jobs() -> Vec<ScheduledJob> {
        jobs_for(&ServiceIdentity::default(), &DeploySettings::default())
    }

    #[test]
    fn job_lines() {
        let jobs = jobs();
        assert_eq!(
            jobs[0].line(),
            "*/5 * * * * /usr/local/bin/minerctl monitor >> /var/log/crypto-miner/monitor.log 2>&1 # crypto-miner:monitor"
        );
        assert_eq!(
            jobs[1].line(),
            "0 2 * * * /usr/local/bin/minerctl backup >> /var/log/crypto-miner/backup.log 2>&1 # crypto-miner:backup"
        );
    }

    #[test]
    fn merge_keeps_unrelated_entries_and_replaces_stale_ones() {
        let jobs = jobs();
        let existing = "MAILTO=ops@example.com\n\
                        0 * * * * /usr/bin/certbot renew\n\
                        */10 * * * * /old/minerctl monitor # crypto-miner:monitor\n";
        let merged = merge_crontab(existing, &jobs);

        let lines: Vec<&str> = merged.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "MAILTO=ops@example.com");
        assert_eq!(lines[1], "0 * * * * /usr/bin/certbot renew");
        assert_eq!(lines[2], jobs[0].line());
        assert_eq!(lines[3], jobs[1].line());
        assert_eq!(merge_crontab(&merged, &jobs), merged);
    }

    #[test]
    fn duplicate_tagged_lines_collapse() {
        let jobs = jobs();
        let existing = format!("{}\n{}\n", jobs[0].line(), jobs[0].line());
        let merged = merge_crontab(&existing, &jobs);
        assert_eq!(merged.matches("crypto-miner:monitor").count(), 1);
        assert_eq!(merged.matches("crypto-miner:backup").count(), 1);
    }

    #[test]
    fn ensure_jobs_writes_once() {
        let fake = FakeHost::debian("/");
        assert!(ensure_jobs(&fake, &jobs()).unwrap());
        assert!(!ensure_jobs(&fake, &jobs()).unwrap());
        assert_eq!(fake.count_exact("crontab -"), 1);
    }
}
