//! Objective composition, joint regularization and the directive-driven
//! projected Gauss–Newton inversion loop.

pub mod data_misfit;
pub mod deprecated;
pub mod directives;
pub mod inversion;
pub mod mapping;
pub mod objective;
pub mod optimization;
pub mod regularization;
pub mod simulation;
