use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::model::{ModuleId, SectionId};

/// Sections per module when nothing more specific is configured.
pub const DEFAULT_SECTIONS_PER_MODULE: u32 = 3;

/// Page and quiz counts for one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionLayout {
    pub total_pages: u32,
    pub quizzes_total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLayout {
    pub total_sections: u32,
    /// Keyed by 1-based section number.
    #[serde(default)]
    pub sections: BTreeMap<u32, SectionLayout>,
}

/// Course structure the unlock policy needs: how many sections each module
/// has, and optionally the page/quiz counts of each section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curriculum {
    #[serde(default = "default_sections")]
    default_sections: u32,
    #[serde(default)]
    modules: BTreeMap<u32, ModuleLayout>,
}

fn default_sections() -> u32 {
    DEFAULT_SECTIONS_PER_MODULE
}

impl Default for Curriculum {
    /// Three sections per module, except module 6 which has one.
    fn default() -> Self {
        let mut modules = BTreeMap::new();
        modules.insert(
            6,
            ModuleLayout {
                total_sections: 1,
                sections: BTreeMap::new(),
            },
        );
        Self {
            default_sections: DEFAULT_SECTIONS_PER_MODULE,
            modules,
        }
    }
}

impl Curriculum {
    /// A curriculum where every module has `default_sections` sections.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::EmptyModule` if `default_sections` is zero.
    pub fn uniform(default_sections: u32) -> Result<Self, PolicyError> {
        if default_sections == 0 {
            return Err(PolicyError::EmptyModule { module: 0 });
        }
        Ok(Self {
            default_sections,
            modules: BTreeMap::new(),
        })
    }

    /// Overrides the section count of one module.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::EmptyModule` if `total_sections` is zero.
    pub fn with_module(mut self, module: ModuleId, total_sections: u32) -> Result<Self, PolicyError> {
        if total_sections == 0 {
            return Err(PolicyError::EmptyModule {
                module: module.value(),
            });
        }
        self.modules.entry(module.value()).or_default().total_sections = total_sections;
        Ok(self)
    }

    /// Records page/quiz counts for a section.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::SectionOutOfModule` if the section lies beyond
    /// the module's section count.
    pub fn with_section(
        mut self,
        module: ModuleId,
        section: SectionId,
        layout: SectionLayout,
    ) -> Result<Self, PolicyError> {
        self.check_section(module, section)?;
        let default_sections = self.default_sections;
        let entry = self
            .modules
            .entry(module.value())
            .or_insert_with(|| ModuleLayout {
                total_sections: default_sections,
                sections: BTreeMap::new(),
            });
        entry.sections.insert(section.value(), layout);
        Ok(self)
    }

    /// Checks the invariants a deserialized curriculum must hold.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::EmptyModule` for zero-section modules and
    /// `PolicyError::SectionOutOfModule` for layouts past the last section.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.default_sections == 0 {
            return Err(PolicyError::EmptyModule { module: 0 });
        }
        for (&module, layout) in &self.modules {
            if layout.total_sections == 0 {
                return Err(PolicyError::EmptyModule { module });
            }
            if let Some((&section, _)) = layout
                .sections
                .iter()
                .find(|(s, _)| **s == 0 || **s > layout.total_sections)
            {
                return Err(PolicyError::SectionOutOfModule {
                    module,
                    section,
                    total: layout.total_sections,
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn total_sections_for_module(&self, module: ModuleId) -> u32 {
        self.modules
            .get(&module.value())
            .map_or(self.default_sections, |m| m.total_sections)
    }

    #[must_use]
    pub fn section_layout(&self, module: ModuleId, section: SectionId) -> Option<SectionLayout> {
        self.modules
            .get(&module.value())
            .and_then(|m| m.sections.get(&section.value()))
            .copied()
    }

    /// Rejects sections past the end of the module.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::SectionOutOfModule` if `section` is beyond the
    /// module's last section.
    pub fn check_section(&self, module: ModuleId, section: SectionId) -> Result<(), PolicyError> {
        let total = self.total_sections_for_module(module);
        if section.value() > total {
            return Err(PolicyError::SectionOutOfModule {
                module: module.value(),
                section: section.value(),
                total,
            });
        }
        Ok(())
    }
}
