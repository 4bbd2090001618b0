//! Schema creation and script loading against in-memory SQLite

use bdpm_ingest::database::Database;
use bdpm_ingest::decoder::decode_line;
use bdpm_ingest::pipeline::render_sql;
use bdpm_ingest::schema::SchemaRegistry;
use bdpm_ingest::statement::StatementBuilder;

async fn memory_db() -> Database {
    Database::connect("sqlite::memory:").await.unwrap()
}

fn script_for(registry: &SchemaRegistry, key: &str, lines: &[&str]) -> String {
    let file = registry.get(key).unwrap();
    let builder = file.statement_builder(&file.schema).unwrap();
    let statements: Vec<String> = lines
        .iter()
        .map(|line| line.split('\t').collect::<Vec<_>>())
        .filter_map(|fields| builder.build(&decode_line(&file.schema, &fields).record))
        .collect();
    render_sql(&statements)
}

#[tokio::test]
async fn test_recreate_builtin_schema() {
    let registry = SchemaRegistry::builtin().unwrap();
    let db = memory_db().await;

    db.recreate_schema(registry.tables()).await.unwrap();
    // Twice in a row: tables are dropped first
    db.recreate_schema(registry.tables()).await.unwrap();

    for table in registry.tables() {
        assert_eq!(db.count_rows(&table.name).await.unwrap(), 0, "{}", table.name);
    }
}

#[tokio::test]
async fn test_load_specialites_and_presentations() {
    let registry = SchemaRegistry::builtin().unwrap();
    let db = memory_db().await;
    db.recreate_schema(registry.tables()).await.unwrap();

    let specialites = script_for(
        &registry,
        "CIS_bdpm",
        &[
            "60234100\tDOLIPRANE 1000 mg, comprimé\tcomprimé\torale\tAutorisation active\tProcédure nationale\tCommercialisée\t12/07/1997\t\t\tOPELLA HEALTHCARE FRANCE\tNon",
            "61266250\tA 313 200 000 UI POUR CENT, pommade\tpommade\tcutanée\tAutorisation active\tProcédure nationale\tCommercialisée\t12/03/1998\t\t\tPHARMA DEVELOPPEMENT\tNon",
        ],
    );
    db.execute_script(&specialites).await.unwrap();
    assert_eq!(db.count_rows("specialite").await.unwrap(), 2);

    let presentations = script_for(
        &registry,
        "CIS_CIP_bdpm",
        &["60234100\t3004313\tplaquette(s) PVC aluminium de 8 comprimé(s)\tPrésentation active\tDéclaration de commercialisation\t16/03/2011\t3400930043137\toui\t65%\t1,16\t1,16\t\t"],
    );
    db.execute_script(&presentations).await.unwrap();

    let (taux, prix, agrement): (i64, f64, i64) = sqlx::query_as(
        "SELECT tauxRemboursement, prix, agrementCollectivites FROM presentation WHERE CIP13 = '3400930043137'",
    )
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(taux, 65);
    assert!((prix - 1.16).abs() < f64::EPSILON);
    assert_eq!(agrement, 1);

    let date: String = sqlx::query_scalar("SELECT dateAMM FROM specialite WHERE CIS = '60234100'")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(date, "1997-07-12");
}

#[tokio::test]
async fn test_ct_links_update_smr_rows() {
    let registry = SchemaRegistry::builtin().unwrap();
    let db = memory_db().await;
    db.recreate_schema(registry.tables()).await.unwrap();

    let smr = script_for(
        &registry,
        "CIS_HAS_SMR_bdpm",
        &["60234100\tCT-12345\tInscription (CT)\t20190305\tImportant\tLe service médical rendu est important"],
    );
    db.execute_script(&smr).await.unwrap();

    let links = script_for(
        &registry,
        "HAS_LiensPageCT_bdpm",
        &[
            "CT-12345\thttps://www.has-sante.fr/jcms/c_12345",
            "CT-99999\t",
        ],
    );
    assert_eq!(links.matches("UPDATE").count(), 1);
    db.execute_script(&links).await.unwrap();

    let (date, link): (String, String) =
        sqlx::query_as("SELECT dateAvisCT, lienAvisCT FROM avis_smr WHERE codeHAS = 'CT-12345'")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(date, "2019-03-05");
    assert_eq!(link, "https://www.has-sante.fr/jcms/c_12345");
}

#[tokio::test]
async fn test_failed_script_is_rolled_back() {
    let registry = SchemaRegistry::builtin().unwrap();
    let db = memory_db().await;
    db.recreate_schema(registry.tables()).await.unwrap();

    let line = "60234100\tDOLIPRANE\tcomprimé\torale\t\t\t\t\t\t\t\tNon";
    let duplicate = script_for(&registry, "CIS_bdpm", &[line, line]);

    assert!(db.execute_script(&duplicate).await.is_err());
    assert_eq!(db.count_rows("specialite").await.unwrap(), 0);

    // The connection is usable again after the rollback
    let single = script_for(&registry, "CIS_bdpm", &[line]);
    db.execute_script(&single).await.unwrap();
    assert_eq!(db.count_rows("specialite").await.unwrap(), 1);
}
