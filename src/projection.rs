use crate::aggregate::SummaryStats;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Assumptions behind every projection. These silently decide the output, so
/// they come from configuration rather than being baked in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionSettings {
    pub chats_per_user_per_day: f64,
    /// Used to back out a chat volume when only spend is known.
    pub assumed_cost_per_chat: f64,
    pub user_counts: Vec<u64>,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            chats_per_user_per_day: 15.0,
            assumed_cost_per_chat: 0.003,
            user_counts: vec![100, 500, 1000, 2500, 5000],
        }
    }
}

impl ProjectionSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.chats_per_user_per_day.is_finite() || self.chats_per_user_per_day < 0.0 {
            return Err(AppError::Config(format!(
                "projection.chats_per_user_per_day must be non-negative, got {}",
                self.chats_per_user_per_day
            )));
        }
        if !self.assumed_cost_per_chat.is_finite() || self.assumed_cost_per_chat <= 0.0 {
            return Err(AppError::Config(format!(
                "projection.assumed_cost_per_chat must be positive, got {}",
                self.assumed_cost_per_chat
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub avg_daily_cost: f64,
    pub avg_chat_volume: f64,
    pub cost_per_chat: f64,
    pub chats_per_user_per_day: f64,
    pub daily_cost_by_users: BTreeMap<u64, f64>,
}

#[derive(Debug, Clone)]
pub struct ProjectionModel {
    settings: ProjectionSettings,
}

impl ProjectionModel {
    pub fn new(settings: ProjectionSettings) -> Result<Self, AppError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ProjectionSettings {
        &self.settings
    }

    /// Chat volume implied by a daily spend at the assumed cost per chat.
    pub fn estimate_chat_volume(&self, avg_daily_cost: f64) -> f64 {
        avg_daily_cost / self.settings.assumed_cost_per_chat
    }

    /// With no chat volume to calibrate against, the cost per chat is zero and
    /// so is every projection.
    pub fn project(
        &self,
        avg_daily_cost: f64,
        avg_chat_volume: f64,
        user_counts: &[u64],
    ) -> Projection {
        let cost_per_chat = if avg_chat_volume > 0.0 {
            avg_daily_cost / avg_chat_volume
        } else {
            0.0
        };
        let per_user = cost_per_chat * self.settings.chats_per_user_per_day;
        let daily_cost_by_users = user_counts
            .iter()
            .map(|&users| (users, per_user * users as f64))
            .collect();

        Projection {
            avg_daily_cost,
            avg_chat_volume,
            cost_per_chat,
            chats_per_user_per_day: self.settings.chats_per_user_per_day,
            daily_cost_by_users,
        }
    }

    pub fn project_from_history(&self, stats: &SummaryStats) -> Projection {
        let volume = self.estimate_chat_volume(stats.average_daily_cost);
        self.project(stats.average_daily_cost, volume, &self.settings.user_counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ProjectionModel {
        ProjectionModel::new(ProjectionSettings::default()).expect("defaults are valid")
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn projects_daily_cost_for_user_counts() {
        let p = model().project(30.0, 10_000.0, &[100]);
        assert!(close(p.cost_per_chat, 0.003));
        assert!(close(p.daily_cost_by_users[&100], 4.5));
    }

    #[test]
    fn zero_chat_volume_projects_zero() {
        let p = model().project(30.0, 0.0, &[100, 1000]);
        assert_eq!(p.cost_per_chat, 0.0);
        assert!(p.daily_cost_by_users.values().all(|c| *c == 0.0));
    }

    #[test]
    fn chat_volume_is_backed_out_from_assumed_cost() {
        assert!(close(model().estimate_chat_volume(30.0), 10_000.0));
    }

    #[test]
    fn history_projection_uses_configured_user_counts() {
        let stats = SummaryStats {
            total_cost: 90.0,
            average_daily_cost: 30.0,
            max_daily_cost: 40.0,
            min_daily_cost: 20.0,
            days_with_usage: 3,
            total_days: 3,
        };
        let p = model().project_from_history(&stats);

        assert_eq!(
            p.daily_cost_by_users.keys().copied().collect::<Vec<_>>(),
            vec![100, 500, 1000, 2500, 5000]
        );
        assert!(close(p.cost_per_chat, 0.003));
        assert!(close(p.daily_cost_by_users[&5000], 225.0));
    }

    #[test]
    fn different_assumptions_give_different_projections() {
        let busy = ProjectionModel::new(ProjectionSettings {
            chats_per_user_per_day: 30.0,
            ..ProjectionSettings::default()
        })
        .expect("valid");
        let a = model().project(30.0, 10_000.0, &[100]);
        let b = busy.project(30.0, 10_000.0, &[100]);
        assert!(close(b.daily_cost_by_users[&100], 2.0 * a.daily_cost_by_users[&100]));
    }

    #[test]
    fn settings_reject_non_positive_assumed_cost() {
        let err = ProjectionModel::new(ProjectionSettings {
            assumed_cost_per_chat: 0.0,
            ..ProjectionSettings::default()
        })
        .expect_err("zero assumed cost");
        assert!(err.to_string().contains("assumed_cost_per_chat"));
    }

    #[test]
    fn settings_reject_negative_chat_rate() {
        let settings = ProjectionSettings {
            chats_per_user_per_day: -1.0,
            ..ProjectionSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
