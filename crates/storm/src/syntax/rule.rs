//! Rules: the grammar role of a type.
//!
//! A rule is an ordinary type in the name tree whose payload additionally
//! carries grammar information: the parameters a match receives, the result
//! the transform produces, and a default syntax-highlighting color. The
//! productions of a rule are registered on this payload as they load.

use strum::{Display, EnumString};

use crate::{
    diag::CResult,
    entity::EntityId,
    syntax::production::ProductionId,
    typesys::TypeFlags,
    value::Value,
    world::World,
};

/// Syntax highlighting colors a grammar may assign to tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "camelCase")]
pub enum TokenColor {
    Comment,
    Delimiter,
    String,
    Constant,
    Keyword,
    FnName,
    VarName,
    TypeName,
}

/// The grammar payload of a rule type.
#[derive(Debug, Default)]
pub struct RuleData {
    /// Parameters of the rule: each match receives these.
    pub params: Vec<(Value, String)>,
    /// The declared result of transforming a match.
    pub result: Value,
    /// Default color of tokens matched directly by this rule.
    pub color: Option<TokenColor>,
    /// Productions of this rule, in load order.
    pub productions: Vec<ProductionId>,
}

impl World {
    /// Creates a detached rule type named `name`.
    pub fn new_rule(&mut self, name: impl Into<String>, result: Value) -> CResult<EntityId> {
        let ty = self.new_type(name, TypeFlags::CLASS)?;
        self.type_data_mut(ty).rule = Some(RuleData {
            result,
            ..RuleData::default()
        });
        Ok(ty)
    }

    /// The rule payload of `ty`, if it is a rule.
    pub fn rule_data(&self, ty: EntityId) -> Option<&RuleData> {
        match &self.entity(ty).kind {
            crate::entity::EntityKind::Type(t) => t.rule.as_ref(),
            _ => None,
        }
    }

    /// Registers `production` as a production of its rule and creates the
    /// production type: a fresh subclass of the rule type whose members are
    /// the bound tokens.
    pub fn attach_production(&mut self, production: crate::syntax::production::Production) -> CResult<ProductionId> {
        let rule = production.rule;
        if self.rule_data(rule).is_none() {
            return Err(crate::diag::CompileError::new(
                crate::diag::ErrorKind::LangDefError,
                format!("{} is not a rule", self.path_string(rule)),
            ));
        }
        let prod_name = match production.name.clone() {
            Some(name) => name,
            None => self.anon_name(rule)?,
        };
        let id = self.add_production(production);

        let ty = self.new_type(prod_name, TypeFlags::CLASS)?;
        self.type_data_mut(ty).production = Some(id);
        self.set_super(ty, Some(rule))?;
        self.production_mut(id).ty = Some(ty);

        self.type_data_mut(rule)
            .rule
            .as_mut()
            .expect("checked to be a rule above")
            .productions
            .push(id);
        Ok(id)
    }
}
