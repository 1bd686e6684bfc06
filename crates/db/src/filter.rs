use compound_core::TenantKey;

/// Equality filter on the tenant triple. Every read against the store
/// requires one; cross-tenant leakage is a test-suite property.
#[derive(Debug, Clone)]
pub struct TenantFilter {
  pub project_name: String,
  pub branch_name: String,
  pub path_hash: String,
}

impl TenantFilter {
  pub fn new(tenant: &TenantKey) -> Self {
    Self {
      project_name: tenant.project_name.clone(),
      branch_name: tenant.branch_name.clone(),
      path_hash: tenant.path_hash.clone(),
    }
  }

  pub fn as_tenant_key(&self) -> TenantKey {
    TenantKey::new(&self.project_name, &self.branch_name, &self.path_hash)
  }
}

impl From<&TenantKey> for TenantFilter {
  fn from(tenant: &TenantKey) -> Self {
    Self::new(tenant)
  }
}
