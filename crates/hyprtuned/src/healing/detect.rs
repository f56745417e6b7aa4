//! Issue detection, deduplication and hysteresis.

use crate::history::History;
use hyprtune_common::{HealthSample, Issue, IssueCategory, Severity, TriggerMetric};
use tracing::{info, warn};

/// A raised issue resolves once its metric falls below this fraction of the threshold
pub const RESOLVE_FACTOR: f64 = 0.8;

/// Samples considered by trend detection
pub const TREND_WINDOW: usize = 10;

/// Fewest samples a trend is computed over
pub const TREND_MIN_SAMPLES: usize = 5;

pub const CPU_TREND_MARGIN: f64 = 20.0;
pub const MEMORY_TREND_MARGIN: f64 = 15.0;

pub const TITLE_HIGH_CPU: &str = "High CPU Usage";
pub const TITLE_HIGH_MEMORY: &str = "High Memory Usage";
pub const TITLE_HIGH_TEMPERATURE: &str = "High Temperature";
pub const TITLE_LOW_DISK: &str = "Low Disk Space";
pub const TITLE_COMPOSITOR: &str = "Compositor Not Responding";
pub const TITLE_CPU_TREND: &str = "CPU Usage Trending Up";
pub const TITLE_MEMORY_LEAK: &str = "Possible Memory Leak";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub temperature: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: 90.0,
            memory: 95.0,
            disk: 95.0,
            temperature: 85.0,
        }
    }
}

impl Thresholds {
    /// Threshold for a numeric trigger; `None` for the compositor
    pub fn for_metric(&self, metric: TriggerMetric) -> Option<f64> {
        match metric {
            TriggerMetric::Cpu => Some(self.cpu),
            TriggerMetric::Memory => Some(self.memory),
            TriggerMetric::Disk => Some(self.disk),
            TriggerMetric::Temperature => Some(self.temperature),
            TriggerMetric::Compositor => None,
        }
    }
}

/// Current value of a numeric trigger metric
pub fn metric_value(sample: &HealthSample, metric: TriggerMetric) -> Option<f64> {
    match metric {
        TriggerMetric::Cpu => Some(sample.cpu_usage),
        TriggerMetric::Memory => Some(sample.memory_usage),
        TriggerMetric::Disk => Some(sample.disk_usage),
        TriggerMetric::Temperature => Some(sample.max_temperature()),
        TriggerMetric::Compositor => None,
    }
}

struct IssueTemplate {
    category: IssueCategory,
    severity: Severity,
    title: &'static str,
    description: String,
    symptoms: &'static [&'static str],
    causes: &'static [&'static str],
    fixes: &'static [&'static str],
    trigger: TriggerMetric,
    auto_fixable: bool,
}

impl IssueTemplate {
    fn build(self, sample: &HealthSample) -> Issue {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Issue {
            id: uuid::Uuid::new_v4().to_string(),
            detected_at: sample.timestamp,
            category: self.category,
            severity: self.severity,
            title: self.title.to_string(),
            description: self.description,
            symptoms: owned(self.symptoms),
            potential_causes: owned(self.causes),
            suggested_fixes: owned(self.fixes),
            trigger: self.trigger,
            metrics: sample.clone(),
            auto_fixable: self.auto_fixable,
            resolved: false,
            resolution_attempts: 0,
            resolution_timestamp: None,
        }
    }
}

/// Second-half mean minus first-half mean exceeds `margin`
pub fn is_trending_up(values: &[f64], margin: f64) -> bool {
    if values.len() < TREND_MIN_SAMPLES {
        return false;
    }
    let (first, second) = values.split_at(values.len() / 2);
    let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
    mean(second) - mean(first) > margin
}

/// Issues raised by `sample`; `history` already contains it.
pub fn detect(
    sample: &HealthSample,
    history: &History<HealthSample>,
    thresholds: &Thresholds,
) -> Vec<Issue> {
    let mut templates = Vec::new();

    if sample.cpu_usage > thresholds.cpu {
        templates.push(IssueTemplate {
            category: IssueCategory::Performance,
            severity: if sample.cpu_usage >= 95.0 {
                Severity::High
            } else {
                Severity::Medium
            },
            title: TITLE_HIGH_CPU,
            description: format!(
                "CPU usage has reached {:.1}%, which may cause system slowdown",
                sample.cpu_usage
            ),
            symptoms: &[
                "System responsiveness decreased",
                "Applications running slowly",
                "High CPU temperature possible",
            ],
            causes: &[
                "Resource-intensive applications running",
                "Background processes consuming CPU",
                "Inefficient system configuration",
            ],
            fixes: &[
                "Kill resource-intensive processes",
                "Reduce visual effects and animations",
            ],
            trigger: TriggerMetric::Cpu,
            auto_fixable: true,
        });
    }

    if sample.memory_usage > thresholds.memory {
        templates.push(IssueTemplate {
            category: IssueCategory::Memory,
            severity: if sample.memory_usage > 98.0 {
                Severity::Critical
            } else {
                Severity::High
            },
            title: TITLE_HIGH_MEMORY,
            description: format!(
                "Memory usage has reached {:.1}%, system may become unstable",
                sample.memory_usage
            ),
            symptoms: &[
                "System becoming unresponsive",
                "Applications crashing",
                "Swap usage increasing",
            ],
            causes: &[
                "Memory leaks in applications",
                "Too many applications running",
                "System caches growing too large",
            ],
            fixes: &["Clear system caches", "Enable compressed swap"],
            trigger: TriggerMetric::Memory,
            auto_fixable: true,
        });
    }

    let temperature = sample.max_temperature();
    if temperature > thresholds.temperature {
        templates.push(IssueTemplate {
            category: IssueCategory::System,
            severity: if temperature > 90.0 {
                Severity::Critical
            } else {
                Severity::High
            },
            title: TITLE_HIGH_TEMPERATURE,
            description: format!(
                "System temperature has reached {:.1}°C, thermal throttling may occur",
                temperature
            ),
            symptoms: &["System performance decreasing", "Thermal throttling active"],
            causes: &["Dust buildup in cooling system", "Excessive system load"],
            fixes: &["Reduce system load", "Lower performance settings"],
            trigger: TriggerMetric::Temperature,
            auto_fixable: true,
        });
    }

    if sample.disk_usage > thresholds.disk {
        templates.push(IssueTemplate {
            category: IssueCategory::Disk,
            severity: if sample.disk_usage > 98.0 {
                Severity::Critical
            } else {
                Severity::High
            },
            title: TITLE_LOW_DISK,
            description: format!("Root filesystem is {:.1}% full", sample.disk_usage),
            symptoms: &["Writes failing", "Applications unable to save state"],
            causes: &["Large caches or logs", "Accumulated downloads"],
            fixes: &["Remove unneeded files", "Clean package caches"],
            trigger: TriggerMetric::Disk,
            auto_fixable: false,
        });
    }

    if !sample.compositor_responsive {
        templates.push(IssueTemplate {
            category: IssueCategory::Stability,
            severity: Severity::High,
            title: TITLE_COMPOSITOR,
            description: "Hyprland is not responding to hyprctl".to_string(),
            symptoms: &["hyprctl commands timing out", "Window management not working"],
            causes: &["Compositor hang", "GPU driver issues", "Resource exhaustion"],
            fixes: &["Restart Hyprland", "Reset configuration"],
            trigger: TriggerMetric::Compositor,
            auto_fixable: true,
        });
    }

    let recent: Vec<&HealthSample> = history.tail(TREND_WINDOW).collect();
    let cpu: Vec<f64> = recent.iter().map(|s| s.cpu_usage).collect();
    if is_trending_up(&cpu, CPU_TREND_MARGIN) {
        templates.push(IssueTemplate {
            category: IssueCategory::Performance,
            severity: Severity::Medium,
            title: TITLE_CPU_TREND,
            description: "CPU usage has been steadily increasing".to_string(),
            symptoms: &["Gradual system slowdown"],
            causes: &["Resource leak", "Background processes"],
            fixes: &["Monitor processes", "Restart applications"],
            trigger: TriggerMetric::Cpu,
            auto_fixable: false,
        });
    }

    let memory: Vec<f64> = recent.iter().map(|s| s.memory_usage).collect();
    if is_trending_up(&memory, MEMORY_TREND_MARGIN) {
        templates.push(IssueTemplate {
            category: IssueCategory::Memory,
            severity: Severity::Medium,
            title: TITLE_MEMORY_LEAK,
            description: "Memory usage has been steadily increasing".to_string(),
            symptoms: &["Progressive system slowdown"],
            causes: &["Memory leak in application"],
            fixes: &["Identify leaking process", "Restart applications"],
            trigger: TriggerMetric::Memory,
            auto_fixable: false,
        });
    }

    templates.into_iter().map(|s| s.build(sample)).collect()
}

/// Whether `issue` has recovered according to `sample`
pub fn is_resolved(issue: &Issue, sample: &HealthSample, thresholds: &Thresholds) -> bool {
    match (
        thresholds.for_metric(issue.trigger),
        metric_value(sample, issue.trigger),
    ) {
        (Some(threshold), Some(value)) => value < RESOLVE_FACTOR * threshold,
        _ => sample.compositor_responsive,
    }
}

/// What happened to a candidate issue
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Tracked as a new active issue
    New(Issue),
    /// Matched an active issue whose severity was raised; carries the updated issue
    Escalated(Issue),
    /// Matched an active issue; nothing changed
    Duplicate,
}

/// Active issues in detection order
#[derive(Debug, Clone, Default)]
pub struct IssueBook {
    active: Vec<Issue>,
}

impl IssueBook {
    pub fn new(active: Vec<Issue>) -> Self {
        Self {
            active: active.into_iter().filter(|i| !i.resolved).collect(),
        }
    }

    /// Deduplicate by (category, title) against active issues.
    pub fn admit(&mut self, candidate: Issue) -> Admission {
        let existing = self
            .active
            .iter_mut()
            .find(|i| i.category == candidate.category && i.title == candidate.title);

        match existing {
            Some(issue) if candidate.severity > issue.severity => {
                warn!(
                    "Issue escalated: {} {} -> {}",
                    issue.title, issue.severity, candidate.severity
                );
                issue.severity = candidate.severity;
                issue.description = candidate.description;
                Admission::Escalated(issue.clone())
            }
            Some(_) => Admission::Duplicate,
            None => {
                warn!("Detected new issue: {} ({})", candidate.title, candidate.severity);
                self.active.push(candidate.clone());
                Admission::New(candidate)
            }
        }
    }

    /// Archive every issue that recovered, returning them marked resolved.
    pub fn resolve_recovered(
        &mut self,
        sample: &HealthSample,
        thresholds: &Thresholds,
        now: f64,
    ) -> Vec<Issue> {
        let (recovered, still_active): (Vec<Issue>, Vec<Issue>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|i| is_resolved(i, sample, thresholds));
        self.active = still_active;

        recovered
            .into_iter()
            .map(|mut issue| {
                issue.resolved = true;
                issue.resolution_timestamp = Some(now);
                info!("Issue resolved: {}", issue.title);
                issue
            })
            .collect()
    }

    pub fn active(&self) -> &[Issue] {
        &self.active
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Issue> {
        self.active.iter_mut().find(|i| i.id == id)
    }

    pub fn count_with(&self, severity: Severity) -> usize {
        self.active.iter().filter(|i| i.severity == severity).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_sample(cpu: f64) -> HealthSample {
        HealthSample {
            cpu_usage: cpu,
            ..HealthSample::default()
        }
    }

    #[test]
    fn test_trend_needs_five_values() {
        assert!(!is_trending_up(&[0.0, 0.0, 100.0, 100.0], 20.0));
        assert!(is_trending_up(&[0.0, 0.0, 100.0, 100.0, 100.0], 20.0));
        assert!(!is_trending_up(&[50.0; 10], 20.0));
    }

    #[test]
    fn test_detection_is_strictly_above_threshold() {
        let t = Thresholds::default();
        let mut history = History::new(10);
        let at = cpu_sample(90.0);
        history.push(at.clone());
        assert!(detect(&at, &history, &t).is_empty());

        let over = cpu_sample(90.5);
        let issues = detect(&over, &history, &t);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].title, TITLE_HIGH_CPU);
        assert_eq!(issues[0].severity, Severity::Medium);
        assert_eq!(issues[0].metrics, over);
    }

    #[test]
    fn test_temperature_uses_hottest_sensor() {
        let t = Thresholds::default();
        let sample = HealthSample {
            cpu_temperature: 60.0,
            gpu_temperature: 91.0,
            ..HealthSample::default()
        };
        let mut history = History::new(10);
        history.push(sample.clone());
        let issues = detect(&sample, &history, &t);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, IssueCategory::System);
        assert_eq!(issues[0].severity, Severity::Critical);
    }

    #[test]
    fn test_disk_issue_is_not_auto_fixable() {
        let t = Thresholds::default();
        let sample = HealthSample {
            disk_usage: 96.0,
            ..HealthSample::default()
        };
        let mut history = History::new(10);
        history.push(sample.clone());
        let issues = detect(&sample, &history, &t);
        assert_eq!(issues[0].title, TITLE_LOW_DISK);
        assert!(!issues[0].auto_fixable);
    }

    #[test]
    fn test_escalation_never_lowers_severity() {
        let t = Thresholds::default();
        let history = History::new(10);
        let mut book = IssueBook::default();

        let first = detect(&cpu_sample(96.0), &history, &t).remove(0);
        let id = first.id.clone();
        assert!(matches!(book.admit(first), Admission::New(_)));

        let lower = detect(&cpu_sample(91.0), &history, &t).remove(0);
        assert_eq!(book.admit(lower), Admission::Duplicate);
        assert_eq!(book.active()[0].severity, Severity::High);
        assert_eq!(book.active()[0].id, id);
    }

    #[test]
    fn test_compositor_issue_resolves_when_responsive() {
        let t = Thresholds::default();
        let hung = HealthSample {
            compositor_responsive: false,
            ..HealthSample::default()
        };
        let mut book = IssueBook::default();
        let mut history = History::new(10);
        history.push(hung.clone());
        for issue in detect(&hung, &history, &t) {
            book.admit(issue);
        }
        assert!(book.resolve_recovered(&hung, &t, 1.0).is_empty());

        let resolved = book.resolve_recovered(&HealthSample::default(), &t, 2.0);
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].resolved);
        assert_eq!(resolved[0].resolution_timestamp, Some(2.0));
        assert!(book.active().is_empty());
    }
}
