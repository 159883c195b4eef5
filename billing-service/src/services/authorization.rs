//! Service-scope resolution for cashier payments.

use crate::error::BillingError;
use crate::models::CashierProfile;
use uuid::Uuid;

/// Roles that may bill any service.
pub const GENERAL_ROLES: [&str; 3] = ["general_cashier", "cash_admin", "admin"];

/// Role restricted to an allow-list of services.
pub const SERVICE_CASHIER_ROLE: &str = "service_cashier";

/// Roles that may close another cashier's session.
pub const SUPERVISOR_ROLES: [&str; 2] = ["cash_admin", "admin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashierRoleClass {
    General,
    ServiceScoped,
    Other,
}

impl CashierRoleClass {
    /// A general role wins over `service_cashier` when a user holds both.
    pub fn from_roles<S: AsRef<str>>(roles: &[S]) -> Self {
        let has = |wanted: &str| roles.iter().any(|r| r.as_ref() == wanted);

        if GENERAL_ROLES.iter().any(|role| has(*role)) {
            CashierRoleClass::General
        } else if has(SERVICE_CASHIER_ROLE) {
            CashierRoleClass::ServiceScoped
        } else {
            CashierRoleClass::Other
        }
    }
}

impl CashierProfile {
    pub fn role_class(&self) -> CashierRoleClass {
        CashierRoleClass::from_roles(&self.roles)
    }

    pub fn is_supervisor(&self) -> bool {
        self.roles
            .iter()
            .any(|r| SUPERVISOR_ROLES.contains(&r.as_str()))
    }
}

/// Service id to attach to a payment.
///
/// `invoice_service` is the invoice's own service (snapshotted from its visit);
/// `requested` is an explicit override from the request.
pub fn resolve_payment_service(
    profile: &CashierProfile,
    invoice_service: Option<Uuid>,
    requested: Option<Uuid>,
) -> Result<Option<Uuid>, BillingError> {
    match profile.role_class() {
        CashierRoleClass::General | CashierRoleClass::Other => Ok(requested.or(invoice_service)),
        CashierRoleClass::ServiceScoped => {
            let allowed = &profile.allowed_service_ids;
            if allowed.is_empty() {
                return Err(BillingError::NoServiceAssigned);
            }
            [invoice_service, requested]
                .into_iter()
                .flatten()
                .find(|service| allowed.contains(service))
                .map(Some)
                .ok_or(BillingError::ServiceNotAuthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(roles: &[&str], allowed: &[Uuid]) -> CashierProfile {
        CashierProfile {
            user_id: Uuid::new_v4(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            allowed_service_ids: allowed.to_vec(),
        }
    }

    #[test]
    fn role_class_prefers_general_roles() {
        assert_eq!(
            CashierRoleClass::from_roles(&["service_cashier", "cash_admin"]),
            CashierRoleClass::General
        );
        assert_eq!(
            CashierRoleClass::from_roles(&["service_cashier"]),
            CashierRoleClass::ServiceScoped
        );
        assert_eq!(
            CashierRoleClass::from_roles(&["nurse"]),
            CashierRoleClass::Other
        );
        assert_eq!(
            CashierRoleClass::from_roles::<&str>(&[]),
            CashierRoleClass::Other
        );
    }

    #[test]
    fn general_cashier_prefers_requested_then_invoice_service() {
        let p = profile(&["general_cashier"], &[]);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(resolve_payment_service(&p, Some(a), Some(b)), Ok(Some(b)));
        assert_eq!(resolve_payment_service(&p, Some(a), None), Ok(Some(a)));
        assert_eq!(resolve_payment_service(&p, None, None), Ok(None));
    }

    #[test]
    fn other_roles_resolve_like_general() {
        let p = profile(&["receptionist"], &[]);
        let a = Uuid::new_v4();
        assert_eq!(resolve_payment_service(&p, Some(a), None), Ok(Some(a)));
    }

    #[test]
    fn scoped_cashier_without_services_is_rejected() {
        let p = profile(&["service_cashier"], &[]);
        assert_eq!(
            resolve_payment_service(&p, Some(Uuid::new_v4()), None),
            Err(BillingError::NoServiceAssigned)
        );
    }

    #[test]
    fn scoped_cashier_cannot_bill_another_service() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let p = profile(&["service_cashier"], &[a]);

        assert_eq!(
            resolve_payment_service(&p, Some(b), None),
            Err(BillingError::ServiceNotAuthorized)
        );
    }

    #[test]
    fn scoped_cashier_prefers_invoice_service_when_allowed() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let p = profile(&["service_cashier"], &[a, b]);

        assert_eq!(resolve_payment_service(&p, Some(a), Some(b)), Ok(Some(a)));
    }

    #[test]
    fn scoped_cashier_falls_back_to_allowed_requested_service() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let p = profile(&["service_cashier"], &[a]);

        assert_eq!(resolve_payment_service(&p, Some(b), Some(a)), Ok(Some(a)));
        assert_eq!(resolve_payment_service(&p, None, Some(a)), Ok(Some(a)));
        assert_eq!(
            resolve_payment_service(&p, None, None),
            Err(BillingError::ServiceNotAuthorized)
        );
    }

    #[test]
    fn supervisors_are_cash_admins_and_admins() {
        assert!(profile(&["cash_admin"], &[]).is_supervisor());
        assert!(!profile(&["general_cashier"], &[]).is_supervisor());
    }
}
