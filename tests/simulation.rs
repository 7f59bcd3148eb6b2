use approx::assert_relative_eq;
use strdyn::analysis::desk_check_series;
use strdyn::simulator::{initial_conditions_with, InitialConditionRule, OdeOptions};
use strdyn::*;

fn base_params(rates: TransitionRates) -> ParameterSet {
    ParameterSet::new(0.006, 0.00006, 0.00594, 0.005, 0.5, rates)
}

fn generating_rates() -> TransitionRates {
    TransitionRates::new(0.006, 0.2, 0.3, 5.0)
}

/// Observations whose treatment counts are produced by the model itself
fn synthetic_observations(
    years: &[i32],
    populations: &[f64],
    params: &ParameterSet,
) -> ObservationSeries {
    let times: Vec<f64> = years.iter().map(|y| f64::from(*y)).collect();
    let driver = PopulationSeries::new(&times, populations).expect("population series");
    let model = StrModel::new(*params, driver);

    let p0 = populations[0];
    let t0 = params.m * p0;
    let r0 = params.phi * t0;
    let state0 = State::new(p0 - t0 - r0, t0, r0);

    let trajectory = Simulator::new(&model)
        .evaluate_at_points(times[0], times[times.len() - 1], state0, &times)
        .expect("forward run");

    let rows = years
        .iter()
        .zip(populations)
        .zip(trajectory.iter())
        .map(|((year, population), point)| Observation::new(*year, *population, point.state.t))
        .collect();
    ObservationSeries::new(rows).expect("synthetic observations")
}

#[test]
fn reference_example_initial_state() {
    let observations = ObservationSeries::builder()
        .observation(2010, 100_000.0, 500.0)
        .observation(2011, 101_000.0, 520.0)
        .observation(2012, 102_000.0, 540.0)
        .build()
        .expect("observations");
    let params = base_params(generating_rates());

    let ic = initial_conditions(&observations, &params, 2010).expect("initial conditions");
    assert_relative_eq!(ic.state.t, 500.0, max_relative = 1e-12);
    assert_relative_eq!(ic.state.r, 250.0, max_relative = 1e-12);
    assert_relative_eq!(ic.state.s, 99_250.0, max_relative = 1e-12);
    assert!((ic.state.total() - 100_000.0).abs() < 1e-9);
    assert!(ic.warnings.is_empty());
}

#[test]
fn forward_run_reproduces_its_own_observations() {
    let params = base_params(generating_rates());
    let observations = synthetic_observations(
        &[2010, 2011, 2012],
        &[100_000.0, 101_000.0, 102_000.0],
        &params,
    );

    let table = desk_check(&observations, &params, 2010, 2012).expect("desk check");
    assert_eq!(table.len(), 3);
    for row in table.rows() {
        assert!(row.error_abs.expect("observed year").abs() < 1e-9);
        assert!(row.error_rel.expect("non-zero observation") < 1e-12);
    }

    let stats = calculate_statistics(&observations, &params, 2010, 2012).expect("statistics");
    assert_eq!(stats.n_obs, 3);
    assert!(stats.mse < 1e-18);
    assert!(stats.mape < 1e-9);
}

#[test]
fn simulate_is_deterministic() {
    let params = base_params(generating_rates());
    let driver =
        PopulationSeries::new(&[2010.0, 2020.0], &[100_000.0, 120_000.0]).expect("driver");
    let model = StrModel::new(params, driver);
    let state0 = State::new(99_250.0, 500.0, 250.0);

    let first = Simulator::new(&model)
        .simulate(2010.0, 2020.0, state0, 101)
        .expect("first run");
    let second = Simulator::new(&model)
        .simulate(2010.0, 2020.0, state0, 101)
        .expect("second run");
    assert_eq!(first, second);
}

#[test]
fn uniform_and_pointwise_runs_agree_on_shared_times() {
    let params = base_params(generating_rates());
    let driver = PopulationSeries::new(
        &[2010.0, 2012.0, 2015.0],
        &[100_000.0, 104_000.0, 103_000.0],
    )
    .expect("driver");
    let model = StrModel::new(params, driver);
    let state0 = State::new(99_250.0, 500.0, 250.0);
    let simulator = Simulator::new(&model);

    let uniform = simulator
        .simulate(2010.0, 2015.0, state0, 11)
        .expect("uniform run");
    let pointwise = simulator
        .evaluate_at_points(2010.0, 2015.0, state0, &[2012.5, 2011.0, 2015.0])
        .expect("pointwise run");

    for point in pointwise.iter() {
        let shared = uniform.at(point.time).expect("shared time");
        assert_relative_eq!(shared.state.s, point.state.s, max_relative = 1e-10);
        assert_relative_eq!(shared.state.t, point.state.t, max_relative = 1e-10);
        assert_relative_eq!(shared.state.r, point.state.r, max_relative = 1e-10);
    }
}

#[test]
fn tighter_tolerances_converge_to_the_same_trajectory() {
    let params = base_params(generating_rates());
    let driver =
        PopulationSeries::new(&[2010.0, 2020.0], &[100_000.0, 120_000.0]).expect("driver");
    let model = StrModel::new(params, driver);
    let state0 = State::new(99_250.0, 500.0, 250.0);

    let default = Simulator::new(&model)
        .simulate(2010.0, 2020.0, state0, 11)
        .expect("default tolerances");
    let tight = Simulator::new(&model)
        .with_options(OdeOptions::default().with_tolerances(1e-12, 1e-10))
        .simulate(2010.0, 2020.0, state0, 11)
        .expect("tight tolerances");

    for (a, b) in default.iter().zip(tight.iter()) {
        assert_relative_eq!(a.state.t, b.state.t, max_relative = 1e-6);
    }
}

#[test]
fn integration_failure_is_a_hard_error_for_direct_callers() {
    let params = base_params(generating_rates());
    let driver = PopulationSeries::new(&[2010.0], &[100_000.0]).expect("driver");
    let model = StrModel::new(params, driver);
    let result = Simulator::new(&model)
        .with_options(OdeOptions::default().with_max_steps(1))
        .simulate(2010.0, 2030.0, State::new(99_250.0, 500.0, 250.0), 5);
    assert!(matches!(result, Err(StrError::IntegrationFailure { .. })));
}

#[test]
fn reversed_window_is_invalid_input() {
    let params = base_params(generating_rates());
    let driver = PopulationSeries::new(&[2010.0], &[100_000.0]).expect("driver");
    let model = StrModel::new(params, driver);
    let result =
        Simulator::new(&model).simulate(2012.0, 2010.0, State::new(1.0, 1.0, 1.0), 3);
    assert!(matches!(result, Err(StrError::InvalidInput { .. })));
}

#[test]
fn desk_check_keeps_unobserved_years() {
    let params = base_params(generating_rates());
    let observations = ObservationSeries::builder()
        .observation(2010, 100_000.0, 500.0)
        .observation(2013, 103_000.0, 0.0)
        .build()
        .expect("observations");

    let table = desk_check_series(&observations, &params).expect("desk check");
    let years: Vec<i32> = table.rows().iter().map(|row| row.year).collect();
    assert_eq!(years, vec![2010, 2011, 2012, 2013]);

    let gap = &table.rows()[1];
    assert_eq!(gap.t_obs, None);
    assert_eq!(gap.error_abs, None);
    assert!(gap.t_model > 0.0);

    // zero observation: absolute error defined, relative error not
    let last = &table.rows()[3];
    assert_eq!(last.t_obs, Some(0.0));
    assert!(last.error_abs.is_some());
    assert_eq!(last.error_rel, None);

    assert_eq!(table.statistics().n_obs, 2);
}

#[test]
fn desk_check_requires_observed_start_year() {
    let params = base_params(generating_rates());
    let observations = ObservationSeries::builder()
        .observation(2010, 100_000.0, 500.0)
        .observation(2012, 102_000.0, 540.0)
        .build()
        .expect("observations");
    let result = desk_check(&observations, &params, 2011, 2012);
    assert!(matches!(result, Err(StrError::MissingYear { year: 2011 })));
}

#[test]
fn clamped_initial_state_is_reported_with_the_table() {
    let params = ParameterSet::new(0.006, 0.00006, 0.00594, 0.9, 0.5, generating_rates());
    let observations = ObservationSeries::builder()
        .observation(2010, 1_000.0, 10.0)
        .observation(2011, 1_000.0, 10.0)
        .build()
        .expect("observations");

    let table = desk_check(&observations, &params, 2010, 2011).expect("desk check");
    assert!(matches!(
        table.warnings(),
        [ModelWarning::NegativeStateClamped { .. }]
    ));
    assert_eq!(table.rows()[0].s_model, 0.0);
}

#[test]
fn observed_rule_seeds_treatment_from_data() {
    let params = base_params(generating_rates());
    let observations = ObservationSeries::builder()
        .observation(2010, 100_000.0, 800.0)
        .build()
        .expect("observations");
    let ic = initial_conditions_with(&observations, &params, 2010, InitialConditionRule::Observed)
        .expect("initial conditions");
    assert_eq!(ic.state.t, 800.0);
    assert_eq!(ic.state.r, 400.0);
}
