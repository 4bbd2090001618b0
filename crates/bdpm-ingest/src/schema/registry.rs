//! Built-in declarations of the BDPM source files
//!
//! Each [`SourceFile`] ties together the column schema of one published file,
//! its target table and how its records become SQL. The registry order is
//! the load order: the CT-link file updates rows of the SMR table and so
//! comes after it.

use super::{Column, Schema, Transform};
use crate::database::{SqlType, TableDef};
use crate::statement::{InsertBuilder, StatementBuilder, UpdateBuilder};
use bdpm_common::{BdpmError, Result};
use std::collections::HashMap;
use std::path::Path;

const CIS_PATTERN: &str = r"\d{8}";

/// How records of a file become statements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementPlan {
    /// One INSERT per record into the file's own table
    Insert,
    /// Conditional UPDATE of rows in another file's table
    Update {
        table: String,
        key: String,
        set: Vec<String>,
    },
}

/// One published source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Dataset name, e.g. `CIS_bdpm`
    pub key: String,
    pub name: String,
    pub description: String,
    pub schema: Schema,
    /// `None` for files that only update another table
    pub table: Option<TableDef>,
    pub plan: StatementPlan,
}

impl SourceFile {
    /// Statement builder for records decoded with `schema`
    ///
    /// Insert columns follow `schema`, which may be an override of the
    /// built-in one.
    pub fn statement_builder(&self, schema: &Schema) -> Option<Box<dyn StatementBuilder>> {
        match (&self.plan, &self.table) {
            (StatementPlan::Insert, Some(table)) => {
                Some(Box::new(InsertBuilder::new(&table.name, schema.field_names())))
            },
            (StatementPlan::Insert, None) => None,
            (StatementPlan::Update { table, key, set }, _) => {
                Some(Box::new(UpdateBuilder::new(table, key, set.iter().cloned())))
            },
        }
    }
}

/// The ordered set of source files to ingest
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    files: Vec<SourceFile>,
}

impl SchemaRegistry {
    /// Registry with arbitrary files; keys must be unique
    pub fn new(files: Vec<SourceFile>) -> Result<Self> {
        for (i, file) in files.iter().enumerate() {
            if files[..i].iter().any(|f| f.key == file.key) {
                return Err(BdpmError::config(format!("duplicate source file `{}`", file.key)));
            }
            if let Some(table) = &file.table {
                if let Some(missing) = table
                    .primary_key
                    .iter()
                    .chain(&table.indices)
                    .find(|c| !table.has_column(c))
                {
                    return Err(BdpmError::config(format!(
                        "table `{}` has no column `{}`",
                        table.name, missing
                    )));
                }
            }
        }
        Ok(Self { files })
    }

    /// The files published by the BDPM
    pub fn builtin() -> Result<Self> {
        Self::new(vec![
            specialites()?,
            presentations()?,
            compositions()?,
            avis_smr()?,
            avis_asmr()?,
            liens_avis_ct()?,
            groupes_generiques()?,
            conditions_prescription()?,
            informations_importantes()?,
        ])
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn get(&self, key: &str) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.key.as_str())
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.files.iter().filter_map(|f| f.table.as_ref())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Per-file column overrides loaded from a JSON object keyed by file key
///
/// Values are kept unparsed: a broken override only fails its own file.
#[derive(Debug, Clone, Default)]
pub struct SchemaOverrides {
    schemas: HashMap<String, serde_json::Value>,
}

impl SchemaOverrides {
    pub fn from_json(json: &str) -> Result<Self> {
        let schemas = serde_json::from_str(json)
            .map_err(|e| BdpmError::config(format!("schema override file: {}", e)))?;
        Ok(Self { schemas })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// The override for `file` if any, else its built-in schema
    ///
    /// An override of an inserting file may only name columns of its table.
    pub fn schema_for(&self, file: &SourceFile) -> Result<Schema> {
        let Some(value) = self.schemas.get(&file.key) else {
            return Ok(file.schema.clone());
        };

        let schema = Schema::from_value(value.clone())
            .map_err(|e| BdpmError::config(format!("{} ({}): {}", file.key, file.name, e)))?;

        if let (StatementPlan::Insert, Some(table)) = (&file.plan, &file.table) {
            if let Some(unknown) = schema.field_names().find(|f| !table.has_column(f)) {
                return Err(BdpmError::config(format!(
                    "{} ({}): table `{}` has no column `{}`",
                    file.key, file.name, table.name, unknown
                )));
            }
        }
        Ok(schema)
    }
}

fn cis() -> Result<Column> {
    Column::matching("CIS", CIS_PATTERN)
}

fn specialites() -> Result<SourceFile> {
    Ok(SourceFile {
        key: "CIS_bdpm".into(),
        name: "Spécialités".into(),
        description: "Liste des médicaments commercialisés ou en arrêt de commercialisation \
                      depuis moins de trois ans"
            .into(),
        schema: Schema::new(vec![
            cis()?,
            Column::string("nom"),
            Column::string("formePharma"),
            Column::array("voieAdministration", ";"),
            Column::string("statutAMM"),
            Column::string("typeAMM"),
            Column::string("etatCommercialisation"),
            Column::date("dateAMM", "DD/MM/YYYY")?,
            Column::string("statusBDM"),
            Column::string("numAutorisation"),
            Column::array("titulaires", ";"),
            Column::string("surveillance").with_transform(Transform::YesNo),
        ])?,
        table: Some(
            TableDef::new("specialite")
                .column("CIS", SqlType::Text)
                .column("nom", SqlType::Text)
                .column("formePharma", SqlType::Text)
                .column("voieAdministration", SqlType::Text)
                .column("statutAMM", SqlType::Text)
                .column("typeAMM", SqlType::Text)
                .column("etatCommercialisation", SqlType::Text)
                .column("dateAMM", SqlType::Date)
                .column("statusBDM", SqlType::Text)
                .column("numAutorisation", SqlType::Text)
                .column("titulaires", SqlType::Text)
                .column("surveillance", SqlType::Boolean)
                .primary_key(&["CIS"]),
        ),
        plan: StatementPlan::Insert,
    })
}

fn presentations() -> Result<SourceFile> {
    Ok(SourceFile {
        key: "CIS_CIP_bdpm".into(),
        name: "Présentations".into(),
        description: "Conditionnements des spécialités: codes CIP, prix et remboursement".into(),
        schema: Schema::new(vec![
            cis()?,
            Column::matching("CIP7", r"\d{7}")?,
            Column::string("libelle"),
            Column::string("statutAdministratif"),
            Column::string("etatCommercialisation"),
            Column::date("dateDeclarationCom", "DD/MM/YYYY")?,
            Column::matching("CIP13", r"\d{13}")?,
            Column::string("agrementCollectivites").with_transform(Transform::YesNo),
            Column::string("tauxRemboursement").with_transform(Transform::Percent),
            Column::float("prix"),
            Column::float("prixHonoraires"),
            Column::float("honoraires"),
            Column::raw("indicationsRemboursement"),
        ])?,
        table: Some(
            TableDef::new("presentation")
                .column("CIS", SqlType::Text)
                .column("CIP7", SqlType::Text)
                .column("libelle", SqlType::Text)
                .column("statutAdministratif", SqlType::Text)
                .column("etatCommercialisation", SqlType::Text)
                .column("dateDeclarationCom", SqlType::Date)
                .column("CIP13", SqlType::Text)
                .column("agrementCollectivites", SqlType::Boolean)
                .column("tauxRemboursement", SqlType::Integer)
                .column("prix", SqlType::Real)
                .column("prixHonoraires", SqlType::Real)
                .column("honoraires", SqlType::Real)
                .column("indicationsRemboursement", SqlType::Text)
                .primary_key(&["CIP13"])
                .index("CIS")
                .index("CIP7"),
        ),
        plan: StatementPlan::Insert,
    })
}

fn compositions() -> Result<SourceFile> {
    Ok(SourceFile {
        key: "CIS_COMPO_bdpm".into(),
        name: "Compositions".into(),
        description: "Substances actives et fractions thérapeutiques des spécialités".into(),
        schema: Schema::new(vec![
            cis()?,
            Column::string("designation"),
            Column::string("codeSubstance"),
            Column::string("nomSubstance"),
            Column::string("dosageSubstance"),
            Column::string("refDosage"),
            Column::one_of("nature", &["SA", "FT"]),
            Column::int("numLiaison"),
        ])?,
        table: Some(
            TableDef::new("composition")
                .column("CIS", SqlType::Text)
                .column("designation", SqlType::Text)
                .column("codeSubstance", SqlType::Text)
                .column("nomSubstance", SqlType::Text)
                .column("dosageSubstance", SqlType::Text)
                .column("refDosage", SqlType::Text)
                .column("nature", SqlType::Text)
                .column("numLiaison", SqlType::Integer)
                .index("CIS")
                .index("codeSubstance"),
        ),
        plan: StatementPlan::Insert,
    })
}

fn avis_columns(valeur: &str, libelle: &str) -> Result<Vec<Column>> {
    Ok(vec![
        cis()?,
        Column::string("codeHAS"),
        Column::string("motifEval"),
        Column::date_as("dateAvisCT", "YYYYMMDD", "YYYY-MM-DD")?,
        Column::string(valeur),
        Column::raw(libelle),
    ])
}

fn avis_table(name: &str, valeur: &str, libelle: &str) -> TableDef {
    TableDef::new(name)
        .column("CIS", SqlType::Text)
        .column("codeHAS", SqlType::Text)
        .column("motifEval", SqlType::Text)
        .column("dateAvisCT", SqlType::Date)
        .column(valeur, SqlType::Text)
        .column(libelle, SqlType::Text)
        .index("CIS")
        .index("codeHAS")
}

fn avis_smr() -> Result<SourceFile> {
    Ok(SourceFile {
        key: "CIS_HAS_SMR_bdpm".into(),
        name: "Avis SMR".into(),
        description: "Avis de la Commission de la Transparence sur le service médical rendu"
            .into(),
        schema: Schema::new(avis_columns("valeurSMR", "libelleSMR")?)?,
        table: Some(
            avis_table("avis_smr", "valeurSMR", "libelleSMR").column("lienAvisCT", SqlType::Text),
        ),
        plan: StatementPlan::Insert,
    })
}

fn avis_asmr() -> Result<SourceFile> {
    Ok(SourceFile {
        key: "CIS_HAS_ASMR_bdpm".into(),
        name: "Avis ASMR".into(),
        description: "Avis de la Commission de la Transparence sur l'amélioration du service \
                      médical rendu"
            .into(),
        schema: Schema::new(avis_columns("valeurASMR", "libelleASMR")?)?,
        table: Some(avis_table("avis_asmr", "valeurASMR", "libelleASMR")),
        plan: StatementPlan::Insert,
    })
}

fn liens_avis_ct() -> Result<SourceFile> {
    Ok(SourceFile {
        key: "HAS_LiensPageCT_bdpm".into(),
        name: "Liens vers les avis CT".into(),
        description: "Liens vers les pages des avis de la Commission de la Transparence".into(),
        schema: Schema::new(vec![Column::string("codeHAS"), Column::string("lienAvisCT")])?,
        table: None,
        plan: StatementPlan::Update {
            table: "avis_smr".into(),
            key: "codeHAS".into(),
            set: vec!["lienAvisCT".into()],
        },
    })
}

fn groupes_generiques() -> Result<SourceFile> {
    Ok(SourceFile {
        key: "CIS_GENER_bdpm".into(),
        name: "Groupes génériques".into(),
        description: "Groupes génériques et type de chaque spécialité dans son groupe".into(),
        schema: Schema::new(vec![
            Column::int("idGroupeGen"),
            Column::string("libelleGroupeGen"),
            cis()?,
            Column::int("typeGen"),
            Column::int("codeTri"),
        ])?,
        table: Some(
            TableDef::new("groupe_generique")
                .column("idGroupeGen", SqlType::Integer)
                .column("libelleGroupeGen", SqlType::Text)
                .column("CIS", SqlType::Text)
                .column("typeGen", SqlType::Integer)
                .column("codeTri", SqlType::Integer)
                .primary_key(&["idGroupeGen", "CIS"])
                .index("CIS"),
        ),
        plan: StatementPlan::Insert,
    })
}

fn conditions_prescription() -> Result<SourceFile> {
    Ok(SourceFile {
        key: "CIS_CPD_bdpm".into(),
        name: "Conditions de prescription".into(),
        description: "Conditions de prescription et de délivrance".into(),
        schema: Schema::new(vec![cis()?, Column::string("conditions")])?,
        table: Some(
            TableDef::new("condition_prescription")
                .column("CIS", SqlType::Text)
                .column("conditions", SqlType::Text)
                .index("CIS"),
        ),
        plan: StatementPlan::Insert,
    })
}

fn informations_importantes() -> Result<SourceFile> {
    Ok(SourceFile {
        key: "CIS_InfoImportantes".into(),
        name: "Informations importantes".into(),
        description: "Informations de sécurité publiées pour les spécialités".into(),
        schema: Schema::new(vec![
            cis()?,
            Column::date("dateDebutInfo", "YYYY-MM-DD")?,
            Column::date("dateFinInfo", "YYYY-MM-DD")?,
            Column::raw("texteHTML"),
        ])?,
        table: Some(
            TableDef::new("info_importante")
                .column("CIS", SqlType::Text)
                .column("dateDebutInfo", SqlType::Date)
                .column("dateFinInfo", SqlType::Date)
                .column("texteHTML", SqlType::Text)
                .index("CIS"),
        ),
        plan: StatementPlan::Insert,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = SchemaRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 9);
        assert_eq!(registry.get("CIS_CIP_bdpm").unwrap().schema.len(), 13);
        assert_eq!(registry.tables().count(), 8);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_insert_columns_exist_in_tables() {
        let registry = SchemaRegistry::builtin().unwrap();
        for file in registry.files() {
            if let (StatementPlan::Insert, Some(table)) = (&file.plan, &file.table) {
                for field in file.schema.field_names() {
                    assert!(
                        table.has_column(field),
                        "{}: column {} missing from {}",
                        file.key,
                        field,
                        table.name
                    );
                }
            }
        }
    }

    #[test]
    fn test_update_file_loads_after_its_table() {
        let registry = SchemaRegistry::builtin().unwrap();
        let keys: Vec<_> = registry.keys().collect();
        let smr = keys.iter().position(|k| *k == "CIS_HAS_SMR_bdpm").unwrap();
        let liens = keys.iter().position(|k| *k == "HAS_LiensPageCT_bdpm").unwrap();
        assert!(smr < liens);

        let file = registry.get("HAS_LiensPageCT_bdpm").unwrap();
        let StatementPlan::Update { table, .. } = &file.plan else {
            panic!("expected update plan");
        };
        let target = registry.tables().find(|t| &t.name == table).unwrap();
        assert!(target.has_column("lienAvisCT"));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let file = conditions_prescription().unwrap();
        let err = SchemaRegistry::new(vec![file.clone(), file]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_schema_overrides() {
        let registry = SchemaRegistry::builtin().unwrap();
        let overrides = SchemaOverrides::from_json(
            r#"{
                "CIS_CPD_bdpm": ["CIS", { "name": "conditions", "type": "string" }],
                "CIS_GENER_bdpm": [{ "name": "idGroupeGen", "type": "money" }]
            }"#,
        )
        .unwrap();

        let cpd = registry.get("CIS_CPD_bdpm").unwrap();
        let schema = overrides.schema_for(cpd).unwrap();
        assert!(matches!(&schema.columns()[0], Column::Raw(_)));

        let gener = registry.get("CIS_GENER_bdpm").unwrap();
        assert!(overrides.schema_for(gener).unwrap_err().is_configuration());

        let bdpm = registry.get("CIS_bdpm").unwrap();
        assert_eq!(overrides.schema_for(bdpm).unwrap().len(), 12);
    }

    #[test]
    fn test_override_columns_must_exist_in_table() {
        let registry = SchemaRegistry::builtin().unwrap();
        let overrides = SchemaOverrides::from_json(
            r#"{
                "CIS_CPD_bdpm": ["CIS", "conditions", "extra"],
                "HAS_LiensPageCT_bdpm": ["codeHAS", "lienAvisCT", "commentaire"]
            }"#,
        )
        .unwrap();

        let cpd = registry.get("CIS_CPD_bdpm").unwrap();
        let err = overrides.schema_for(cpd).unwrap_err();
        assert!(err.is_configuration());
        let message = err.to_string();
        assert!(message.contains("CIS_CPD_bdpm"), "{}", message);
        assert!(message.contains("extra"), "{}", message);

        // Update files have no table of their own to check against
        let liens = registry.get("HAS_LiensPageCT_bdpm").unwrap();
        assert_eq!(overrides.schema_for(liens).unwrap().len(), 3);
    }

    #[test]
    fn test_malformed_override_file_is_configuration_error() {
        assert!(SchemaOverrides::from_json("[1, 2]").unwrap_err().is_configuration());
    }
}
