//! Reference set of plans and streaming services, and the product → target
//! lookup used for gateway payloads that only carry product names.

use {
    super::error::PipelineError,
    super::id::{PlanId, ServiceId},
    serde::{Deserialize, Serialize},
    std::collections::HashSet,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub duration_months: u32,
    /// Invoice price in minor units.
    #[serde(default)]
    pub price_cents: Option<i64>,
    /// Cap on game selections. `None` is unbounded.
    #[serde(default)]
    pub max_games: Option<u32>,
    /// Overrides the global per-service slot cap for holders of this plan.
    #[serde(default)]
    pub slots_per_service: Option<u32>,
    #[serde(default)]
    pub product_ids: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingService {
    pub id: ServiceId,
    pub name: String,
    /// Plan granted when this service is purchased.
    pub plan_id: PlanId,
    #[serde(default)]
    pub product_ids: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// A product line of a gateway payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Product {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Target {
    Streaming(ServiceId),
    Game(PlanId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Exact(Target),
    /// Matched by keyword on the product name only. Degraded confidence.
    Fallback { target: Target, keyword: String },
    Unresolved,
}

impl Resolution {
    pub fn target(&self) -> Option<&Target> {
        match self {
            Self::Exact(t) | Self::Fallback { target: t, .. } => Some(t),
            Self::Unresolved => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub services: Vec<StreamingService>,
    /// Plan for generic game-catalog payloads that name no product.
    #[serde(default)]
    pub default_plan: Option<PlanId>,
}

impl Catalog {
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let catalog: Catalog = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let mut plan_ids = HashSet::new();
        for plan in &self.plans {
            if !plan_ids.insert(plan.id.as_str()) {
                return Err(PipelineError::Validation(format!(
                    "duplicate plan id in catalog: {}",
                    plan.id
                )));
            }
            if plan.duration_months == 0 {
                return Err(PipelineError::Validation(format!(
                    "plan {} has zero duration",
                    plan.id
                )));
            }
        }
        let mut service_ids = HashSet::new();
        for service in &self.services {
            if !service_ids.insert(service.id.as_str()) {
                return Err(PipelineError::Validation(format!(
                    "duplicate service id in catalog: {}",
                    service.id
                )));
            }
            if !plan_ids.contains(service.plan_id.as_str()) {
                return Err(PipelineError::Validation(format!(
                    "service {} references unknown plan {}",
                    service.id, service.plan_id
                )));
            }
        }
        if let Some(default) = &self.default_plan
            && !plan_ids.contains(default.as_str())
        {
            return Err(PipelineError::Validation(format!(
                "default plan {default} is not in the catalog"
            )));
        }
        Ok(())
    }

    pub fn plan(&self, id: &PlanId) -> Option<&Plan> {
        self.plans.iter().find(|p| &p.id == id)
    }

    pub fn service(&self, id: &ServiceId) -> Option<&StreamingService> {
        self.services.iter().find(|s| &s.id == id)
    }

    /// Plan granted for a target.
    pub fn plan_for(&self, target: &Target) -> Option<&Plan> {
        match target {
            Target::Streaming(service_id) => {
                self.service(service_id).and_then(|s| self.plan(&s.plan_id))
            }
            Target::Game(plan_id) => self.plan(plan_id),
        }
    }

    /// Exact product-id lookup over every product first, then a keyword scan
    /// of product names. Streaming services win over plans in both passes.
    pub fn resolve_products(&self, products: &[Product]) -> Resolution {
        for product in products {
            if let Some(target) = product.id.as_deref().and_then(|id| self.exact(id)) {
                return Resolution::Exact(target);
            }
        }
        for product in products {
            let Some(name) = product.name.as_deref() else {
                continue;
            };
            if let Some((target, keyword)) = self.by_keyword(name) {
                return Resolution::Fallback { target, keyword };
            }
        }
        Resolution::Unresolved
    }

    fn exact(&self, product_id: &str) -> Option<Target> {
        let product_id = product_id.trim();
        if let Some(service) = self
            .services
            .iter()
            .find(|s| s.id.as_str() == product_id || s.product_ids.iter().any(|p| p == product_id))
        {
            return Some(Target::Streaming(service.id.clone()));
        }
        self.plans
            .iter()
            .find(|p| p.id.as_str() == product_id || p.product_ids.iter().any(|id| id == product_id))
            .map(|p| Target::Game(p.id.clone()))
    }

    fn by_keyword(&self, name: &str) -> Option<(Target, String)> {
        let name = name.to_lowercase();
        let hit = |keywords: &[String]| {
            keywords
                .iter()
                .find(|k| !k.is_empty() && name.contains(&k.to_lowercase()))
                .cloned()
        };
        for service in &self.services {
            if let Some(keyword) = hit(&service.keywords) {
                return Some((Target::Streaming(service.id.clone()), keyword));
            }
        }
        for plan in &self.plans {
            if let Some(keyword) = hit(&plan.keywords) {
                return Some((Target::Game(plan.id.clone()), keyword));
            }
        }
        None
    }
}
