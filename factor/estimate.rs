use super::cfa::{Specification, confirmatory};
use super::data::ItemMatrix;
use super::efa::exploratory;
use super::model::FactorModel;
use super::reliability::reliability;
use super::scoring::Scorer;
use super::tetrachoric::tetrachoric_matrix;
use super::{FactorConfig, FactorError};
use crate::progress::ProgressObserver;

/// Estimates the two-factor model on `matrix`, whose columns must follow
/// [`FactorConfig::items`].
pub fn fit_model(
    matrix: &ItemMatrix,
    config: &FactorConfig,
    progress: &mut dyn ProgressObserver,
) -> Result<FactorModel, FactorError> {
    config.validate()?;
    let items = config.items();
    if matrix.items != items {
        return Err(FactorError::InvalidConfig(format!(
            "item matrix columns {:?} do not follow the configured order {:?}",
            matrix.items, items
        )));
    }
    let groups = config.groups();
    let anchors = config.anchor_positions()?;

    log::info!(
        "Estimating tetrachoric correlations for {} items over {} pupils.",
        items.len(),
        matrix.n_pupils()
    );
    let tetra = tetrachoric_matrix(matrix, config, progress)?;

    let efa = exploratory(&tetra.correlations, &groups, config)?;
    let spec = Specification {
        groups,
        anchors,
        anchor_values: [efa.loadings[[anchors[0], 0]], efa.loadings[[anchors[1], 1]]],
    };
    log::info!(
        "Anchors fixed at their exploratory cross-loadings: {} = {:.4} on cognitive, {} = {:.4} on socioemotional.",
        items[anchors[0]],
        spec.anchor_values[0],
        items[anchors[1]],
        spec.anchor_values[1]
    );

    let n = matrix.scorable_pupils();
    let cfa = confirmatory(&tetra, &efa, &spec, &items, n, config)?;

    let proportions = matrix.proportions();
    let scorer = Scorer::new(cfa.lambda.clone(), cfa.theta.clone(), cfa.phi.clone(), proportions.clone())?;
    let full = scorer.full_weights()?;
    let reliability = reliability(matrix, &spec.groups, &cfa.lambda, &cfa.theta);

    Ok(FactorModel {
        anchors: vec![items[anchors[0]].clone(), items[anchors[1]].clone()],
        items,
        groups: spec.groups,
        n_pupils: n,
        proportions,
        thresholds: tetra.thresholds,
        tetrachoric: tetra.correlations,
        tetrachoric_smoothed: tetra.smoothed,
        pair_counts: tetra.pair_counts,
        efa_loadings: efa.loadings,
        efa_phi: efa.phi,
        efa_communalities: efa.communalities,
        extraction_iterations: efa.extraction_iterations,
        rotation_iterations: efa.rotation_iterations,
        heywood: efa.heywood,
        cfa_iterations: cfa.iterations,
        lambda: cfa.lambda,
        phi: cfa.phi,
        theta: cfa.theta,
        posterior_covariance: full.posterior,
        weights: full.weights,
        fit: cfa.fit,
        reliability,
    })
}
