//! Domain providers: how many entities a scene has and how each is described.

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

pub trait Domain: Send + Sync {
    fn name(&self) -> &str;

    fn num_ent(&self) -> usize;

    /// Features per entity.
    fn dim_ent(&self) -> usize;

    /// Length of a flattened context.
    fn input_length(&self) -> usize {
        self.num_ent() * self.dim_ent()
    }
}

/// OneCommon: seven dots, each described by x, y, size and colour.
#[derive(Clone, Copy, Debug, Default)]
pub struct OneCommonDomain;

impl Domain for OneCommonDomain {
    fn name(&self) -> &str {
        "one_common"
    }

    fn num_ent(&self) -> usize {
        7
    }

    fn dim_ent(&self) -> usize {
        4
    }
}

/// A domain described entirely by its sizes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDomain {
    pub name: String,
    pub num_ent: usize,
    pub dim_ent: usize,
}

impl Domain for CustomDomain {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_ent(&self) -> usize {
        self.num_ent
    }

    fn dim_ent(&self) -> usize {
        self.dim_ent
    }
}

pub fn get_domain(name: &str) -> Result<Box<dyn Domain>> {
    match name {
        "one_common" => Ok(Box::new(OneCommonDomain)),
        other => Err(AgentError::Config(format!("unknown domain {other:?}"))),
    }
}
