//! Manager dashboard aggregates

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;

use crate::storage::{Signalement, SignalementFilter, Statut, Store};

use super::budget::{round1, round2};
use super::error::ServiceResult;

/// How many entreprises the budget breakdown lists
pub const TOP_ENTREPRISES: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusShare {
    pub status: Statut,
    pub libelle: &'static str,
    pub count: u64,
    pub pourcentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntrepriseBudget {
    pub entreprise_id: i64,
    pub nom: String,
    pub budget: f64,
    pub signalements: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Kpis {
    pub taux_resolution: f64,
    pub entreprises_actives: u64,
    pub utilisateurs_total: u64,
    pub total_surface: f64,
    pub total_budget: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardStatistics {
    pub total: u64,
    pub par_status: Vec<StatusShare>,
    pub budget_par_entreprise: Vec<EntrepriseBudget>,
    pub kpis: Kpis,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BudgetSummary {
    pub total: f64,
    pub utilise: f64,
    pub restant: f64,
    pub pourcentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Performance {
    /// Mean days from report to first `termine`, absent when nothing was resolved
    pub delai_moyen_resolution_jours: Option<f64>,
    pub signalements_resolus: u64,
    pub actions_en_cours: u64,
    pub actions_en_retard: u64,
}

#[derive(Clone)]
pub struct DashboardService {
    store: Store,
}

impl DashboardService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn statistics(&self) -> ServiceResult<DashboardStatistics> {
        let totals = self.store.signalement_totals()?;

        let par_status = Statut::ALL
            .iter()
            .map(|s| {
                let count = totals.count(*s);
                StatusShare {
                    status: *s,
                    libelle: s.libelle(),
                    count,
                    pourcentage: percent(count as f64, totals.total as f64),
                }
            })
            .collect();

        let budget_par_entreprise = self
            .store
            .budget_by_entreprise(TOP_ENTREPRISES)?
            .into_iter()
            .map(|(entreprise_id, nom, budget, signalements)| EntrepriseBudget {
                entreprise_id,
                nom,
                budget: round2(budget),
                signalements,
            })
            .collect();

        let kpis = Kpis {
            taux_resolution: percent(totals.count(Statut::Termine) as f64, totals.total as f64),
            entreprises_actives: self.store.count_active_entreprises()?,
            utilisateurs_total: self.store.count_users()?,
            total_surface: round2(totals.total_surface),
            total_budget: round2(totals.total_budget),
        };

        Ok(DashboardStatistics {
            total: totals.total,
            par_status,
            budget_par_entreprise,
            kpis,
        })
    }

    pub fn signalements(&self, filter: &SignalementFilter) -> ServiceResult<Vec<Signalement>> {
        Ok(self.store.list_signalements(filter)?)
    }

    /// `utilise` counts the budget of signalements en_cours or termine
    pub fn budget_summary(&self) -> ServiceResult<BudgetSummary> {
        let totals = self.store.signalement_totals()?;
        let total = round2(totals.total_budget);
        let utilise = round2(totals.budget_engage);

        Ok(BudgetSummary {
            total,
            utilise,
            restant: round2(total - utilise),
            pourcentage: percent(utilise, total),
        })
    }

    pub fn performance(&self) -> ServiceResult<Performance> {
        let reported: HashMap<i64, Signalement> = self
            .store
            .list_signalements(&SignalementFilter::new())?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let durations: Vec<f64> = self
            .store
            .first_reached(Statut::Termine)?
            .into_iter()
            .filter_map(|(id, resolved_at)| {
                let s = reported.get(&id)?;
                let seconds = (resolved_at - s.date_signalement).num_seconds().max(0);
                Some(seconds as f64 / 86_400.0)
            })
            .collect();

        let delai_moyen_resolution_jours = if durations.is_empty() {
            None
        } else {
            Some(round1(durations.iter().sum::<f64>() / durations.len() as f64))
        };

        Ok(Performance {
            delai_moyen_resolution_jours,
            signalements_resolus: durations.len() as u64,
            actions_en_cours: self.store.list_actions_en_cours()?.len() as u64,
            actions_en_retard: self.store.list_actions_en_retard(Utc::now())?.len() as u64,
        })
    }
}

/// `part / whole × 100` with one decimal, 0 when `whole` is 0
fn percent(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        round1(part / whole * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::manager;
    use crate::storage::{NewEntreprise, NewSignalement};
    use chrono::Duration;

    fn report(store: &Store, budget: f64, status: Statut, entreprise_id: Option<i64>) -> Signalement {
        store
            .insert_signalement(
                &NewSignalement {
                    latitude: -18.9,
                    longitude: 47.5,
                    description: "Nid de poule".into(),
                    budget: Some(budget),
                    entreprise_id,
                    status: Some(status),
                    date_signalement: Some(Utc::now() - Duration::days(4)),
                    ..Default::default()
                },
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_empty_dashboard() {
        let store = Store::open_in_memory().unwrap();
        let dashboard = DashboardService::new(store);

        let stats = dashboard.statistics().unwrap();
        assert_eq!(stats.total, 0);
        assert!(stats.par_status.iter().all(|s| s.pourcentage == 0.0));
        assert_eq!(stats.kpis.taux_resolution, 0.0);

        let summary = dashboard.budget_summary().unwrap();
        assert_eq!(summary.pourcentage, 0.0);
        assert_eq!(dashboard.performance().unwrap().delai_moyen_resolution_jours, None);
    }

    #[test]
    fn test_statistics_and_budget_summary() {
        let store = Store::open_in_memory().unwrap();
        manager(&store);
        let colas = store
            .insert_entreprise(&NewEntreprise {
                nom: "COLAS".into(),
                ..Default::default()
            })
            .unwrap();

        report(&store, 1000.0, Statut::Nouveau, None);
        report(&store, 2000.0, Statut::EnCours, Some(colas.id));
        report(&store, 3000.0, Statut::Termine, Some(colas.id));

        let dashboard = DashboardService::new(store);
        let stats = dashboard.statistics().unwrap();
        assert_eq!(stats.total, 3);
        let termine = stats.par_status.iter().find(|s| s.status == Statut::Termine).unwrap();
        assert_eq!(termine.pourcentage, 33.3);
        assert_eq!(stats.kpis.taux_resolution, 33.3);
        assert_eq!(stats.kpis.entreprises_actives, 1);
        assert_eq!(stats.kpis.utilisateurs_total, 1);
        assert_eq!(stats.budget_par_entreprise.len(), 1);
        assert_eq!(stats.budget_par_entreprise[0].budget, 5000.0);
        assert_eq!(stats.budget_par_entreprise[0].signalements, 2);

        let summary = dashboard.budget_summary().unwrap();
        assert_eq!(summary.total, 6000.0);
        assert_eq!(summary.utilise, 5000.0);
        assert_eq!(summary.restant, 1000.0);
        assert_eq!(summary.pourcentage, 83.3);
    }

    #[test]
    fn test_performance_resolution_delay() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let s = report(&store, 100.0, Statut::Nouveau, None);
        store
            .set_signalement_status(s.id, Statut::Nouveau, Statut::EnCours, None, Some(boss.id))
            .unwrap();
        store
            .set_signalement_status(s.id, Statut::EnCours, Statut::Termine, None, Some(boss.id))
            .unwrap();

        let perf = DashboardService::new(store).performance().unwrap();
        assert_eq!(perf.signalements_resolus, 1);
        assert_eq!(perf.delai_moyen_resolution_jours, Some(4.0));
    }
}
