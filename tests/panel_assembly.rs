use eyfactor::files::read_table;
use eyfactor::panel::{Field, PanelConfig, PanelError, assemble, write_panel_table};
use eyfactor::progress::NoopProgress;
use std::fs;
use std::path::Path;

fn write(path: &Path, text: &str) {
    fs::write(path, text).unwrap();
}

fn census_dir(root: &Path) -> std::path::PathBuf {
    let dir = root.join("census");
    fs::create_dir(&dir).unwrap();
    // Column names and codings drift between years.
    write(
        &dir.join("spring_census_2008.tsv"),
        "pupil_id\tgender\tethnicity\tfirst_language\tnsiblings\turn\tsen_provision\n\
         p1\tM\tWBRI\tENG\t2\t100\tN\n\
         p2\tF\tAPKN\tURD\t0\t200\tN\n\
         stranger\tF\tWBRI\tENG\t1\t100\tN\n",
    );
    write(
        &dir.join("spring_census_2010.csv"),
        "pupil_id,sex,white_british,eal,school_id,fsm_eligible,sen_provision\n\
         p1,F,1,0,101,1,N\n\
         p2,F,0,1,200,0,N\n",
    );
    write(
        &dir.join("spring_census_2012.tsv"),
        "pupil_id\tschool_id\tsen_provision\n\
         p1\t101\tA\n\
         p2\t200\tN\n\
         p2\t999\tS\n",
    );
    write(
        &dir.join("spring_census_2013.tsv"),
        "pupil_id\tn_siblings\tschool_id\n\
         p1\t3\t102\n\
         p2\t1\t200\n",
    );
    dir
}

#[test]
fn snapshots_fold_into_one_record_per_pupil() {
    let root = tempfile::tempdir().unwrap();
    let cohort = root.path().join("cohort.tsv");
    write(&cohort, "pupil_id\tcohort\np1\t2008\np2\t2007\np3\t2009\np4\t2015\n");
    let census = census_dir(root.path());

    let config = PanelConfig::default();
    let (records, summary) = assemble(&config, &cohort, &census, &mut NoopProgress).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(summary.snapshots, 4);
    assert_eq!(summary.outside_population_rows, 1);
    assert_eq!(summary.duplicate_snapshot_rows, 1);
    assert_eq!(summary.dropped_cohort_rows, 1);
    assert_eq!(summary.pupils_without_snapshots, 1);

    let p1 = records.iter().find(|r| r.pupil_id == "p1").unwrap();
    // Baseline year wins for invariant fields.
    assert_eq!(p1.invariant(Field::Sex), Some("M"));
    assert_eq!(p1.invariant(Field::WhiteBritish), Some("1"));
    assert_eq!(p1.invariant(Field::Eal), Some("0"));
    // Maximum over the sibling years, not the first value seen.
    assert_eq!(p1.nsiblings, Some(3));
    assert_eq!(p1.ever(Field::Sen), Some(true));
    assert_eq!(p1.ever(Field::SenAction), Some(true));
    assert_eq!(p1.ever(Field::Fsm), Some(true));
    assert_eq!(p1.school_id(0), Some("100"));
    assert_eq!(p1.school_id(2), Some("101"));
    assert_eq!(p1.school_id(1), None);

    let p2 = records.iter().find(|r| r.pupil_id == "p2").unwrap();
    assert_eq!(p2.invariant(Field::Eal), Some("1"));
    assert_eq!(p2.invariant(Field::WhiteBritish), Some("0"));
    // The repeated 2012 row is ignored.
    assert_eq!(p2.ever(Field::Sen), Some(false));
    assert_eq!(p2.ever(Field::SenStatement), Some(false));

    let p3 = records.iter().find(|r| r.pupil_id == "p3").unwrap();
    assert_eq!(p3.invariant(Field::Sex), None);
    assert_eq!(p3.school_moves, None);

    let out = root.path().join("census_panel.tsv");
    let rows = write_panel_table(&out, usize::from(config.span_years), &records).unwrap();
    assert_eq!(rows, 3);
    let table = read_table(&out).unwrap();
    assert_eq!(table.cell(0, "nsiblings"), Some("3"));
    assert_eq!(table.cell(0, "ever_sen"), Some("1"));
    assert_eq!(table.cell(0, "school_id_y2"), Some("101"));
}

#[test]
fn snapshot_without_year_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let cohort = root.path().join("cohort.tsv");
    write(&cohort, "pupil_id\tcohort\np1\t2008\n");
    let census = census_dir(root.path());
    write(&census.join("latest.tsv"), "pupil_id\tsex\np1\tM\n");

    let err = assemble(&PanelConfig::default(), &cohort, &census, &mut NoopProgress).unwrap_err();
    assert!(matches!(err, PanelError::SnapshotYear { ref path } if path.ends_with("latest.tsv")));
}

#[test]
fn empty_snapshot_directory_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let cohort = root.path().join("cohort.tsv");
    write(&cohort, "pupil_id\tcohort\np1\t2008\n");
    let census = root.path().join("census");
    fs::create_dir(&census).unwrap();

    let err = assemble(&PanelConfig::default(), &cohort, &census, &mut NoopProgress).unwrap_err();
    assert!(matches!(err, PanelError::NoSnapshots { .. }));
}
