//! SharePoint roster client over Microsoft Graph
//!
//! Employees, Assets and Access Cards lists: field mapping, record
//! normalization, lookup resolution and assignment.

pub mod api;
pub mod config;
pub mod records;
