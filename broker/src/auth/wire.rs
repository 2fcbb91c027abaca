// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! JSON shape shared by the authfile and webauth backends for one side of
//! an [`crate::types::Authorization`]: either the literal string `"ALL"` or
//! an explicit list of masks.

use serde::Deserialize;

use crate::types::AclRule;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AclRuleWire {
    All(String),
    Masks(Vec<String>),
}

impl From<AclRuleWire> for AclRule {
    fn from(wire: AclRuleWire) -> Self {
        match wire {
            AclRuleWire::All(tag) if tag == "ALL" => Self::All,
            AclRuleWire::All(_other) => Self::Masks(Vec::new()),
            AclRuleWire::Masks(masks) => Self::Masks(masks),
        }
    }
}
