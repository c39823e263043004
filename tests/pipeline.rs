use std::{env, fs, path::PathBuf, sync::Arc};

use approx::assert_relative_eq;
use stackhist::{
    catalog::SampleCatalog,
    data::write_parquet,
    kinematics::lepton_neutrino_columns,
    prelude::*,
    selection::ALL_EVENTS,
    stack::DEFAULT_HEADROOM,
};

fn make_temp_dir() -> PathBuf {
    let dir = env::temp_dir().join(format!("stackhist_it_{}", fastrand::u64(..)));
    fs::create_dir(&dir).expect("temp dir should be created");
    dir
}

fn slice(pt: Vec<f64>, charge_product: Vec<f64>, weight: f64) -> Dataset {
    let n = pt.len();
    Dataset::new("slice")
        .with_column("pt_l", pt)
        .unwrap()
        .with_column("mt", vec![150.0; n])
        .unwrap()
        .with_column("pid1", charge_product)
        .unwrap()
        .with_column("pid2", vec![1.0; n])
        .unwrap()
        .with_column("weight", vec![weight; n])
        .unwrap()
}

fn config(data_dir: &str, store_path: &str) -> PipelineConfig {
    let process = Process::new("p")
        .with_sample("p_100", "100", Color::rgb(100, 192, 232))
        .with_sample("p_200", "200", Color::rgb(248, 206, 104));
    let registry = BinSpecRegistry::new()
        .with("pt_l", 500, 0.0, 5000.0)
        .unwrap()
        .with("mt", 400, 0.0, 8000.0)
        .unwrap();
    let catalog = SampleCatalog::new().with_process(process);
    let mut config = PipelineConfig::new(registry, catalog)
        .with_workers(3)
        .with_partitions(4)
        .with_data_dir(data_dir)
        .with_store_path(store_path);
    config.suffix = "_p".to_string();
    config.selection =
        Selection::new().then("opposite charge", OppositeSign::new("pid1", "pid2"));
    config
}

#[test]
fn test_parquet_pipeline_end_to_end() {
    stackhist::logging::init_test();
    let dir = make_temp_dir();
    let data_dir = dir.join("skims");
    fs::create_dir(&data_dir).unwrap();
    write_parquet(
        &slice(vec![10.0, 10.0, 6000.0, 20.0], vec![-11.0, -11.0, -11.0, 11.0], 1.5),
        data_dir.join("100.parquet").to_str().unwrap(),
    )
    .unwrap();
    write_parquet(
        &slice(vec![12.0, 35.0], vec![-13.0, -13.0], 0.5),
        data_dir.join("200.parquet").to_str().unwrap(),
    )
    .unwrap();
    let store_path = dir.join("histograms.bin");
    let out_dir = dir.join("plots");

    let pipeline = Pipeline::new(config(
        data_dir.to_str().unwrap(),
        store_path.to_str().unwrap(),
    ))
    .unwrap();
    let report = pipeline
        .run(
            &pipeline.parquet_source(),
            &JsonRenderer::new("_p"),
            out_dir.to_str().unwrap(),
        )
        .unwrap();
    assert!(report.is_success(), "{:?}", report.failures());

    let cut_flow = report.cut_flow("p_100").unwrap();
    assert_eq!(cut_flow.stages()[0].name, ALL_EVENTS);
    assert_eq!(cut_flow.stages()[0].passed, 4);
    assert_eq!(cut_flow.stages()[1].passed, 3);
    assert_relative_eq!(cut_flow.stages()[1].sumw, 4.5);

    let p100 = pipeline.store().read("p_100_pt_l").unwrap();
    assert_relative_eq!(p100.content(1), 3.0);
    assert_relative_eq!(p100.overflow(), 1.5);
    assert_relative_eq!(p100.total_weight(), 4.5);

    let stack = StackBuilder::for_process(
        pipeline.config().processes.process("p").unwrap(),
        Arc::clone(pipeline.store()),
        StackStyle::default(),
    )
    .build_process("pt_l")
    .unwrap();
    assert_eq!(stack.labels(), vec!["p_100", "p_200"]);
    assert_relative_eq!(stack.total[1], 3.5);
    assert_relative_eq!(stack.maximum, 3.5 * DEFAULT_HEADROOM);

    assert_eq!(report.artifacts().len(), 2);
    assert!(out_dir.join("p_pt_l_p.json").exists());
    assert!(out_dir.join("p_mt_p.json").exists());

    let restored = HistogramStore::load(store_path.to_str().unwrap()).unwrap();
    assert_eq!(restored.keys(), pipeline.store().keys());
    assert_eq!(
        restored.read("p_200_mt").unwrap(),
        pipeline.store().read("p_200_mt").unwrap()
    );

    fs::remove_dir_all(dir).ok();
}

#[test]
fn test_replot_from_saved_store() {
    let dir = make_temp_dir();
    let store = HistogramStore::new();
    let binning = Binning::new("pt_l", 500, 0.0, 5000.0).unwrap();
    for (label, weight) in [("p_100", 2.0), ("p_200", 1.0)] {
        let mut h = Histogram::new("pt_l", binning);
        h.fill(15.0, weight);
        store.publish(label, vec![("pt_l".to_string(), h)]);
    }
    let mut config = config("unused", "unused");
    config.plot_observables = Some(vec!["pt_l".to_string()]);
    let pipeline = Pipeline::new(config).unwrap().with_store(Arc::new(store));
    let stacks = pipeline.stack(&TextDumpRenderer::new("_p"), dir.to_str().unwrap());
    assert_eq!(stacks.len(), 1);
    let path = stacks[0].result.as_ref().unwrap();
    assert_eq!(path, &dir.join("p_pt_l_p.txt"));
    let text = fs::read_to_string(path).unwrap();
    assert!(text.starts_with("# p_100\n5 0\n15 2\n"));
    assert!(text.contains("# p_200\n"));
    fs::remove_dir_all(dir).ok();
}

// Unweighted generator-level lepton and neutrino kinematics, back to back in phi.
fn kinematics(pt: Vec<f64>) -> Dataset {
    let n = pt.len();
    let mut dataset = Dataset::new("kinematics");
    for (name, values) in [
        ("pt_l", pt.clone()),
        ("eta_l", vec![0.0; n]),
        ("phi_l", vec![0.0; n]),
        ("mass_l", vec![0.0; n]),
        ("pt_n", pt),
        ("eta_n", vec![0.0; n]),
        ("phi_n", vec![std::f64::consts::PI; n]),
        ("mass_n", vec![0.0; n]),
        ("pt_genmet", vec![0.0; n]),
        ("phi_genmet", vec![0.0; n]),
    ] {
        dataset.insert_column(name, values).unwrap();
    }
    dataset
}

#[test]
fn test_two_processes_with_normalized_slices() {
    stackhist::logging::init_test();
    let dir = make_temp_dir();
    let data_dir = dir.join("skims");
    fs::create_dir(&data_dir).unwrap();
    for (file, pt) in [
        ("e_low", vec![110.0, 310.0]),
        ("e_high", vec![910.0]),
        ("m_low", vec![160.0]),
        ("m_high", vec![960.0, 1110.0]),
    ] {
        let path = data_dir.join(format!("{file}.parquet"));
        write_parquet(&kinematics(pt), path.to_str().unwrap()).unwrap();
    }
    let slices = |name: &str, (low, high): (Normalization, Normalization)| {
        let tag = &name[..1];
        Process::new(name)
            .with_normalized_sample(
                format!("{name}_low"),
                format!("{tag}_low"),
                Color::rgb(100, 192, 232),
                low,
            )
            .with_normalized_sample(
                format!("{name}_high"),
                format!("{tag}_high"),
                Color::rgb(248, 206, 104),
                high,
            )
    };
    let enu = slices("enu", (Normalization::new(4.0, 2.0), Normalization::new(1.0, 4.0)));
    let mnu = slices("mnu", (Normalization::new(3.0, 1.0), Normalization::new(1.0, 1.0)));
    let registry = BinSpecRegistry::new()
        .with("mt", 20, 0.0, 4000.0)
        .unwrap()
        .with("m_inv", 20, 0.0, 4000.0)
        .unwrap();
    let mut config = PipelineConfig::new(
        registry,
        SampleCatalog::new().with_process(enu).with_process(mnu),
    )
    .with_workers(4)
    .with_partitions(2)
    .with_data_dir(data_dir.to_str().unwrap())
    .with_weighting(Weighting {
        mode: WeightMode::Stored,
        luminosity: 10.0,
    });
    config.columns = lepton_neutrino_columns();
    config.plot_observables = Some(vec!["mt".to_string()]);

    let out_dir = dir.join("plots");
    let pipeline = Pipeline::new(config).unwrap();
    let report = pipeline
        .run(
            &pipeline.parquet_source(),
            &JsonRenderer::new("_l"),
            out_dir.to_str().unwrap(),
        )
        .unwrap();
    assert!(report.is_success(), "{:?}", report.failures());
    assert_eq!(report.stacks.len(), 2);

    let artifacts = report.artifacts();
    assert_eq!(
        artifacts,
        vec![&out_dir.join("enu_mt_l.json"), &out_dir.join("mnu_mt_l.json")]
    );
    assert!(artifacts.iter().all(|path| path.exists()));

    // mt = 2 pt for back-to-back massless pairs, in 200 GeV bins
    let enu_low = pipeline.store().read("enu_low_mt").unwrap();
    assert_relative_eq!(enu_low.content(1), 20.0);
    assert_relative_eq!(enu_low.content(3), 20.0);
    assert_relative_eq!(report.cut_flow("enu_low").unwrap().stages()[0].sumw, 40.0);
    let m_inv = pipeline.store().read("mnu_high_m_inv").unwrap();
    assert_relative_eq!(m_inv.content(9), 10.0);
    assert_relative_eq!(m_inv.content(11), 10.0);

    for (path, process, total) in [
        (artifacts[0], "enu", 42.5),
        (artifacts[1], "mnu", 50.0),
    ] {
        let text = fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["process"], process);
        assert_eq!(value["layers"].as_array().unwrap().len(), 2);
        let sum: f64 = value["total"]
            .as_array()
            .unwrap()
            .iter()
            .map(|bin| bin.as_f64().unwrap())
            .sum();
        assert_relative_eq!(sum, total);
    }
    fs::remove_dir_all(dir).ok();
}
