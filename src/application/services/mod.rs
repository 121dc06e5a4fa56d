pub mod kpi_service;
