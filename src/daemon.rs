//! Service definition, supervisor access and process lifecycle control.

pub mod control;
pub mod launch;
pub mod status;
pub mod systemd;

pub const SYSTEMD_RUN_DIR: &str = "/run/systemd/system";

pub const SYSTEMD_SERVICE_TEMPLATE: &str = r#"[Unit]
Description={{DESCRIPTION}}
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
User={{USER}}
Group={{GROUP}}
WorkingDirectory={{WORK_DIR}}
{{ENVIRONMENT}}ExecStart={{EXEC_START}}
ExecReload=/bin/kill -HUP $MAINPID
KillSignal=SIGTERM
TimeoutStopSec=30
Restart=on-failure
RestartSec={{RESTART_SEC}}
LimitNOFILE={{LIMIT_NOFILE}}
LimitNPROC={{LIMIT_NPROC}}
NoNewPrivileges=true
PrivateTmp=true
ProtectSystem=strict
ProtectHome=true
ProtectKernelTunables=true
ProtectKernelModules=true
ProtectControlGroups=true
ReadWritePaths={{RW_PATHS}}
StandardOutput=append:{{LOG_FILE}}
StandardError=append:{{LOG_FILE}}

[Install]
WantedBy=multi-user.target
"#;
