//! Repair budget estimation
//!
//! `budget = prix_par_m2 × niveau × surface`, where `prix_par_m2` lives in
//! the `PRIX_PAR_M2` configuration row.

use serde::Serialize;

use crate::storage::settings::PRIX_PAR_M2;
use crate::storage::{Configuration, Store, User};

use super::error::{not_found, ServiceError, ServiceResult};

pub const NIVEAU_MIN: u8 = 1;
pub const NIVEAU_MAX: u8 = 10;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BudgetEstimate {
    pub niveau: u8,
    pub surface: f64,
    pub prix_par_m2: f64,
    pub budget: f64,
}

#[derive(Clone)]
pub struct BudgetService {
    store: Store,
    default_prix_par_m2: f64,
}

impl BudgetService {
    pub fn new(store: Store, default_prix_par_m2: f64) -> Self {
        Self {
            store,
            default_prix_par_m2,
        }
    }

    /// Stored price per m², falling back to the configured default when the
    /// row is missing or unparsable
    pub fn prix_par_m2(&self) -> ServiceResult<f64> {
        let stored = self.store.get_configuration_by_key(PRIX_PAR_M2)?;
        Ok(stored
            .and_then(|c| c.as_decimal())
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(self.default_prix_par_m2))
    }

    pub fn set_prix_par_m2(&self, prix: f64, by: &User) -> ServiceResult<Configuration> {
        if !prix.is_finite() || prix <= 0.0 {
            return Err(ServiceError::Validation("prix_par_m2 must be greater than 0".into()));
        }
        let config = self.store.upsert_configuration(
            PRIX_PAR_M2,
            &prix.to_string(),
            "DECIMAL",
            Some("Prix par mètre carré pour le calcul du budget"),
            Some(by.id),
        )?;
        tracing::info!(prix, by = by.id, "Price per m2 updated");
        Ok(config)
    }

    pub fn calculer_budget(&self, niveau: u8, surface: f64) -> ServiceResult<BudgetEstimate> {
        let prix = self.prix_par_m2()?;
        Ok(BudgetEstimate {
            niveau,
            surface,
            prix_par_m2: prix,
            budget: compute_budget(prix, niveau, surface)?,
        })
    }

    // configuration rows

    pub fn list(&self) -> ServiceResult<Vec<Configuration>> {
        Ok(self.store.list_configurations()?)
    }

    pub fn get(&self, id: i64) -> ServiceResult<Configuration> {
        self.store
            .get_configuration(id)?
            .ok_or_else(|| not_found("configuration", id))
    }

    pub fn get_by_key(&self, cle: &str) -> ServiceResult<Configuration> {
        self.store
            .get_configuration_by_key(cle)?
            .ok_or_else(|| not_found("configuration", cle))
    }

    pub fn update(
        &self,
        id: i64,
        valeur: String,
        description: Option<String>,
        by: &User,
    ) -> ServiceResult<Configuration> {
        let mut config = self.get(id)?;
        if config.cle == PRIX_PAR_M2 {
            let prix: f64 = valeur
                .trim()
                .parse()
                .map_err(|_| ServiceError::Validation(format!("not a decimal: {}", valeur)))?;
            if !prix.is_finite() || prix <= 0.0 {
                return Err(ServiceError::Validation("prix_par_m2 must be greater than 0".into()));
            }
        }
        config.valeur = valeur;
        if description.is_some() {
            config.description = description;
        }
        config.updated_by = Some(by.id);
        Ok(self.store.save_configuration(&config)?)
    }

    pub fn delete(&self, id: i64) -> ServiceResult<()> {
        if !self.store.delete_configuration(id)? {
            return Err(not_found("configuration", id));
        }
        Ok(())
    }
}

/// `prix × niveau × surface`, rounded to cents
pub fn compute_budget(prix: f64, niveau: u8, surface: f64) -> ServiceResult<f64> {
    if !(NIVEAU_MIN..=NIVEAU_MAX).contains(&niveau) {
        return Err(ServiceError::Validation(format!(
            "niveau must be between {} and {}",
            NIVEAU_MIN, NIVEAU_MAX
        )));
    }
    if !surface.is_finite() || surface <= 0.0 {
        return Err(ServiceError::Validation("surface must be greater than 0".into()));
    }
    Ok(round2(prix * f64::from(niveau) * surface))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::manager;

    #[test]
    fn test_compute_budget() {
        assert_eq!(compute_budget(10_000.0, 5, 20.0).unwrap(), 1_000_000.0);
        assert_eq!(compute_budget(12_345.678, 1, 1.0).unwrap(), 12_345.68);
        assert!(compute_budget(10_000.0, 0, 20.0).is_err());
        assert!(compute_budget(10_000.0, 11, 20.0).is_err());
        assert!(compute_budget(10_000.0, 3, 0.0).is_err());
    }

    #[test]
    fn test_default_then_stored_price() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let budget = BudgetService::new(store, 10_000.0);

        assert_eq!(budget.prix_par_m2().unwrap(), 10_000.0);
        budget.set_prix_par_m2(15_000.0, &boss).unwrap();
        assert_eq!(budget.prix_par_m2().unwrap(), 15_000.0);

        let estimate = budget.calculer_budget(2, 3.5).unwrap();
        assert_eq!(estimate.budget, 105_000.0);
    }

    #[test]
    fn test_rejects_non_positive_price() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let budget = BudgetService::new(store, 10_000.0);

        assert!(matches!(
            budget.set_prix_par_m2(0.0, &boss),
            Err(ServiceError::Validation(_))
        ));

        let config = budget.set_prix_par_m2(9_000.0, &boss).unwrap();
        assert!(budget.update(config.id, "-1".to_string(), None, &boss).is_err());
        assert!(budget.update(config.id, "abc".to_string(), None, &boss).is_err());
    }

    #[test]
    fn test_update_rejects_non_finite_price() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let budget = BudgetService::new(store.clone(), 10_000.0);
        let config = budget.set_prix_par_m2(9_000.0, &boss).unwrap();

        for valeur in ["inf", "-inf", "NaN"] {
            assert!(matches!(
                budget.update(config.id, valeur.to_string(), None, &boss),
                Err(ServiceError::Validation(_))
            ));
        }
        assert_eq!(budget.prix_par_m2().unwrap(), 9_000.0);
        assert_eq!(budget.calculer_budget(2, 3.0).unwrap().budget, 54_000.0);
    }

    #[test]
    fn test_stored_non_finite_price_falls_back_to_default() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let budget = BudgetService::new(store.clone(), 10_000.0);
        let mut config = budget.set_prix_par_m2(9_000.0, &boss).unwrap();

        config.valeur = "inf".to_string();
        store.save_configuration(&config).unwrap();

        assert_eq!(config.as_decimal(), None);
        assert_eq!(budget.prix_par_m2().unwrap(), 10_000.0);
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(round1(33.333), 33.3);
        assert_eq!(round1(66.66), 66.7);
        assert_eq!(round2(1234.5678), 1234.57);
    }
}
