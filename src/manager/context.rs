//! Markdown rendering of contrastive results for an LLM context window

use std::fmt::Write;

use super::contrastive::ContrastiveResults;
use crate::playbook::SearchResult;

impl ContrastiveResults {
    /// Render proven and failed approaches as Markdown
    ///
    /// Neutral results are not rendered.
    pub fn to_prompt_context(&self) -> String {
        if self.positive.is_empty() && self.negative.is_empty() {
            return format!("No relevant playbooks found for: {}", self.query);
        }

        let mut out = String::new();
        let _ = write!(out, "## Playbook Context: {}\n\n", self.query);

        if !self.positive.is_empty() {
            out.push_str("### Proven Approaches (Follow These)\n\n");
            for (i, result) in self.positive.iter().enumerate() {
                write_positive_entry(&mut out, i + 1, result);
            }
        }

        if !self.negative.is_empty() {
            out.push_str("### Failed Approaches (Avoid These)\n\n");
            for (i, result) in self.negative.iter().enumerate() {
                write_negative_entry(&mut out, i + 1, result);
            }
        }

        if !self.positive.is_empty() && !self.negative.is_empty() {
            out.push_str("---\n");
            out.push_str("Follow the proven approaches. Avoid the patterns described in failed approaches.\n");
        }

        out
    }
}

fn write_positive_entry(out: &mut String, num: usize, result: &SearchResult) {
    let pb = &result.playbook;
    let _ = write!(
        out,
        "**{}. {}** (confidence: {:.0}%, executions: {})\n\n",
        num,
        pb.name,
        pb.confidence * 100.0,
        pb.total_executions()
    );

    if !pb.steps.is_empty() {
        out.push_str("Steps:\n");
        for step in &pb.steps {
            let _ = writeln!(out, "  {}. {}", step.order, step.action);
        }
        out.push('\n');
    }

    if !pb.lessons.is_empty() {
        out.push_str("Lessons learned:\n");
        for lesson in &pb.lessons {
            let _ = writeln!(out, "  - {}", lesson.content);
        }
        out.push('\n');
    }
}

fn write_negative_entry(out: &mut String, num: usize, result: &SearchResult) {
    let pb = &result.playbook;
    let total = pb.total_executions();
    let failure_rate = if total > 0 {
        pb.failure_count as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let _ = write!(
        out,
        "**{}. {}** (confidence: {:.0}%, failure rate: {:.0}%)\n\n",
        num,
        pb.name,
        pb.confidence * 100.0,
        failure_rate
    );

    if !pb.lessons.is_empty() {
        out.push_str("What failed:\n");
        for lesson in &pb.lessons {
            let _ = writeln!(out, "  - {}", lesson.content);
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::{Lesson, Playbook};

    fn result(name: &str, successes: u32, failures: u32) -> SearchResult {
        let mut playbook = Playbook::new(name, "").with_step("check logs").with_step("restart");
        playbook.success_count = successes;
        playbook.failure_count = failures;
        playbook.update_stats();
        SearchResult { playbook, score: 1.0 }
    }

    #[test]
    fn test_empty_results() {
        let results = ContrastiveResults {
            query: "deploy".to_string(),
            ..Default::default()
        };
        assert_eq!(results.to_prompt_context(), "No relevant playbooks found for: deploy");
    }

    #[test]
    fn test_positive_and_negative_sections() {
        let mut bad = result("Force push", 1, 9);
        bad.playbook.lessons.push(Lesson::from_reflection("rewrites shared history"));
        let mut good = result("Restart service", 10, 1);
        good.playbook.lessons.push(Lesson::from_reflection("check disk first"));

        let results = ContrastiveResults {
            query: "fix outage".to_string(),
            positive: vec![good],
            negative: vec![bad],
            neutral: Vec::new(),
        };
        let md = results.to_prompt_context();

        assert!(md.starts_with("## Playbook Context: fix outage\n\n"));
        assert!(md.contains("### Proven Approaches (Follow These)"));
        assert!(md.contains("**1. Restart service** (confidence: 62%, executions: 11)"));
        assert!(md.contains("Steps:\n  1. check logs\n  2. restart\n"));
        assert!(md.contains("Lessons learned:\n  - check disk first\n"));
        assert!(md.contains("### Failed Approaches (Avoid These)"));
        assert!(md.contains("**1. Force push** (confidence: 2%, failure rate: 90%)"));
        assert!(md.contains("What failed:\n  - rewrites shared history\n"));
        assert!(md.ends_with(
            "---\nFollow the proven approaches. Avoid the patterns described in failed approaches.\n"
        ));
    }

    #[test]
    fn test_positive_only_has_no_closing_line() {
        let results = ContrastiveResults {
            query: "q".to_string(),
            positive: vec![result("A", 5, 0)],
            ..Default::default()
        };
        let md = results.to_prompt_context();
        assert!(!md.contains("Failed Approaches"));
        assert!(!md.contains("---"));
    }
}
