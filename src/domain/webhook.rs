//! Inbound payment notification: shape detection, validation and the
//! normalized event the pipeline works on.

use {
    super::catalog::{Catalog, Product, Resolution, Target},
    super::error::PipelineError,
    super::id::{ServiceId, TransactionId, UserId},
    super::money::{Currency, Money, MoneyAmount},
    super::transaction::{NewTransaction, TransactionKind, TransactionStatus},
    serde::Deserialize,
    serde_json::Value,
};

/// Ids and amounts arrive as strings from some gateways and numbers from others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Num(serde_json::Number),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Num(n) => n.to_string(),
        }
    }

    fn to_amount(&self) -> Result<MoneyAmount, PipelineError> {
        let value = match self {
            Self::Str(s) => s.trim().replace(',', ".").parse::<f64>().map_err(|_| {
                PipelineError::Validation(format!("amount is not a number: {s}"))
            })?,
            Self::Num(n) => n
                .as_f64()
                .ok_or_else(|| PipelineError::Validation(format!("amount out of range: {n}")))?,
        };
        MoneyAmount::from_major(value)
    }
}

#[derive(Debug, Deserialize)]
struct DirectPayload {
    service_id: String,
    user_id: String,
    event: String,
    transaction_id: Scalar,
    amount: Scalar,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayCustomer {
    email: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayPayment {
    id: Scalar,
    amount: Scalar,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayProduct {
    #[serde(default)]
    id: Option<Scalar>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    event: String,
    customer: GatewayCustomer,
    payment: GatewayPayment,
    #[serde(default)]
    products: Vec<GatewayProduct>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{service_id, user_id, event, transaction_id, amount, timestamp}`
    Direct,
    /// `{event, customer, payment, products}`
    Gateway,
}

impl PayloadShape {
    pub fn detect(raw: &Value) -> Self {
        if raw.get("service_id").is_some() && raw.get("user_id").is_some() {
            Self::Direct
        } else {
            Self::Gateway
        }
    }
}

#[derive(Debug, Clone)]
pub struct IncomingEvent {
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    pub event: String,
    pub status: TransactionStatus,
    pub email: Option<String>,
    pub name: Option<String>,
    pub user_id: Option<UserId>,
    pub money: Money,
    pub resolution: Resolution,
    pub raw: Value,
}

fn invalid(err: serde_json::Error) -> PipelineError {
    PipelineError::Validation(format!("malformed payload: {err}"))
}

fn currency(code: Option<&str>) -> Result<Currency, PipelineError> {
    code.map(Currency::try_from)
        .transpose()
        .map(Option::unwrap_or_default)
}

fn required(field: &str, value: &str) -> Result<String, PipelineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PipelineError::Validation(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

impl IncomingEvent {
    pub fn parse(body: &[u8], catalog: &Catalog) -> Result<Self, PipelineError> {
        let raw: Value = serde_json::from_slice(body).map_err(invalid)?;
        if !raw.is_object() {
            return Err(PipelineError::Validation(
                "payload must be a JSON object".into(),
            ));
        }
        match PayloadShape::detect(&raw) {
            PayloadShape::Direct => Self::from_direct(raw, catalog),
            PayloadShape::Gateway => Self::from_gateway(raw, catalog),
        }
    }

    fn from_direct(raw: Value, catalog: &Catalog) -> Result<Self, PipelineError> {
        let payload: DirectPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;

        let service_id = ServiceId::new(payload.service_id)?;
        if catalog.service(&service_id).is_none() {
            return Err(PipelineError::Validation(format!(
                "unknown service_id: {service_id}"
            )));
        }
        let event = required("event", &payload.event)?;

        Ok(Self {
            transaction_id: TransactionId::new(payload.transaction_id.into_string())?,
            kind: TransactionKind::StreamingPurchase,
            status: TransactionStatus::from_event(&event),
            event,
            email: None,
            name: None,
            user_id: Some(UserId::parse(&payload.user_id)?),
            money: Money::new(
                payload.amount.to_amount()?,
                currency(payload.currency.as_deref())?,
            ),
            resolution: Resolution::Exact(Target::Streaming(service_id)),
            raw,
        })
    }

    fn from_gateway(raw: Value, catalog: &Catalog) -> Result<Self, PipelineError> {
        let payload: GatewayPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;

        let email = required("customer.email", &payload.customer.email)?;
        if !email.contains('@') {
            return Err(PipelineError::Validation(format!(
                "customer.email is not an email address: {email}"
            )));
        }
        let event = required("event", &payload.event)?;

        let products: Vec<Product> = payload
            .products
            .into_iter()
            .map(|p| Product {
                id: p.id.map(Scalar::into_string),
                name: p.name,
            })
            .collect();

        let resolution = if products.is_empty() {
            catalog
                .default_plan
                .clone()
                .map(|plan| Resolution::Exact(Target::Game(plan)))
                .unwrap_or(Resolution::Unresolved)
        } else {
            catalog.resolve_products(&products)
        };

        let kind = match resolution.target() {
            Some(Target::Streaming(_)) => TransactionKind::StreamingPurchase,
            _ => TransactionKind::GamePurchase,
        };

        Ok(Self {
            transaction_id: TransactionId::new(payload.payment.id.into_string())?,
            kind,
            status: TransactionStatus::from_event(&event),
            event,
            email: Some(email),
            name: payload.customer.name.filter(|n| !n.trim().is_empty()),
            user_id: None,
            money: Money::new(
                payload.payment.amount.to_amount()?,
                currency(payload.payment.currency.as_deref())?,
            ),
            resolution,
            raw,
        })
    }

    pub fn new_transaction(&self) -> NewTransaction {
        let (plan_id, service_id) = match self.resolution.target() {
            Some(Target::Streaming(service_id)) => (None, Some(service_id.clone())),
            Some(Target::Game(plan_id)) => (Some(plan_id.clone()), None),
            None => (None, None),
        };
        NewTransaction {
            id: self.transaction_id.clone(),
            kind: self.kind,
            event: self.event.clone(),
            status: self.status,
            customer_email: self.email.clone().unwrap_or_default(),
            money: self.money,
            user_id: self.user_id,
            plan_id,
            service_id,
            raw_payload: self.raw.clone(),
        }
    }
}
